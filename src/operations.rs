//! Numerical operations.
//!
//! In-place corrections implement [NumOperation](crate::operation::NumOperation) and reductions
//! implement [NumVisitor](crate::operation::NumVisitor), so that each is written once, generic
//! over the element type.

use std::cmp::{max_by, min_by, Ordering};

use crate::error::CorrectionError;
use crate::operation::{Element, NumOperation, NumVisitor};
use crate::types::Values;

use ndarray::{ArrayView, Axis, IxDyn};

/// Linear calibration `y = factor * x + offset`.
///
/// Integer data are computed in `f64` and converted back with saturation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibrate {
    pub factor: f64,
    pub offset: f64,
}

impl Calibrate {
    /// Returns whether the calibration leaves values unchanged.
    pub fn is_identity(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0
    }
}

impl NumOperation for Calibrate {
    fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError> {
        if self.is_identity() {
            return Ok(());
        }
        for value in values.iter_mut() {
            let x: f64 = value.as_();
            *value = T::from_f64(self.factor * x + self.offset);
        }
        Ok(())
    }
}

/// Replace each value with its reciprocal, zero becoming NaN.
///
/// Only defined for floating point data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Invert;

impl NumOperation for Invert {
    fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError> {
        if !T::DTYPE.is_float() {
            return Err(CorrectionError::UnsupportedDType {
                operation: "invert",
                dtype: T::DTYPE,
            });
        }
        for value in values.iter_mut() {
            if let Some(reciprocal) = value.reciprocal() {
                *value = reciprocal;
            }
        }
        Ok(())
    }
}

/// Add a constant offset to every value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AddOffset {
    pub offset: f64,
}

impl NumOperation for AddOffset {
    fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError> {
        for value in values.iter_mut() {
            let x: f64 = value.as_();
            *value = T::from_f64(x + self.offset);
        }
        Ok(())
    }
}

/// Replace every value with its absolute value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Abs;

impl NumOperation for Abs {
    fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError> {
        for value in values.iter_mut() {
            *value = value.abs();
        }
        Ok(())
    }
}

/// Reduction functions available to subset actions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reduction {
    Minimum,
    Maximum,
    Count,
}

/// Reduce values of shape `shape`, over the whole array or along one axis.
///
/// The result is a pair of the reduced values and their shape. Count results are `uint32`;
/// minimum and maximum keep the input data type.
pub struct Reduce<'a> {
    pub reduction: Reduction,
    pub shape: &'a [usize],
    pub axis: Option<usize>,
}

// NaN is neither greater nor less than anything, so it never replaces a running extreme.
fn max_element_pairwise<T: Element>(x: &&T, y: &&T) -> Ordering {
    x.partial_cmp(y).unwrap_or(Ordering::Greater)
}

fn min_element_pairwise<T: Element>(x: &&T, y: &&T) -> Ordering {
    x.partial_cmp(y).unwrap_or(Ordering::Less)
}

impl NumVisitor for Reduce<'_> {
    type Output = Result<(Values, Vec<usize>), CorrectionError>;

    fn visit_t<T: Element>(self, values: &[T]) -> Self::Output {
        let array = ArrayView::from_shape(IxDyn(self.shape), values)?;
        let Some(axis) = self.axis else {
            let result = match self.reduction {
                Reduction::Minimum => {
                    T::wrap(vec![*array.iter().fold(&T::max_value(), |running, val| {
                        min_by(running, val, min_element_pairwise)
                    })])
                }
                Reduction::Maximum => {
                    T::wrap(vec![*array.iter().fold(&T::min_value(), |running, val| {
                        max_by(running, val, max_element_pairwise)
                    })])
                }
                Reduction::Count => Values::Uint32(vec![u32::try_from(array.len())
                    .unwrap_or(u32::MAX)]),
            };
            return Ok((result, vec![]));
        };
        if axis >= array.ndim() {
            return Err(CorrectionError::InvalidDimension {
                dimid: axis,
                rank: array.ndim(),
            });
        }
        let (result, shape) = match self.reduction {
            Reduction::Minimum => {
                let result = array.fold_axis(Axis(axis), T::max_value(), |running, val| {
                    *min_by(running, val, min_element_pairwise)
                });
                let shape = result.shape().to_vec();
                (T::wrap(result.into_raw_vec()), shape)
            }
            Reduction::Maximum => {
                let result = array.fold_axis(Axis(axis), T::min_value(), |running, val| {
                    *max_by(running, val, max_element_pairwise)
                });
                let shape = result.shape().to_vec();
                (T::wrap(result.into_raw_vec()), shape)
            }
            Reduction::Count => {
                let result = array.fold_axis(Axis(axis), 0_u32, |count, _| count + 1);
                let shape = result.shape().to_vec();
                (Values::Uint32(result.into_raw_vec()), shape)
            }
        };
        Ok((result, shape))
    }
}
