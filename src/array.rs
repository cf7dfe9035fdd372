//! Server-side subsetting of data blocks using [ndarray].
//!
//! A subset action selects from one or more dimensions, then optionally applies a function,
//! drops length-one dimensions and sets the order dimension.

use crate::actions::SubsetAction;
use crate::error::CorrectionError;
use crate::name_value::parse_name_values;
use crate::operation::{visit, Element, NumVisitor, Operation};
use crate::operations::{Abs, Reduce, Reduction};
use crate::subset::{Comparison, SubsetDim, SubsetOperation};
use crate::types::{Buffer, Compression, DataBlock, Dim, DimCoords, ErrorData, Values};

use ndarray::prelude::*;

/// Select `indices` along `axis` of values with shape `shape`.
struct Select<'a> {
    shape: &'a [usize],
    axis: usize,
    indices: &'a [usize],
}

impl NumVisitor for Select<'_> {
    type Output = Result<Values, CorrectionError>;

    fn visit_t<T: Element>(self, values: &[T]) -> Self::Output {
        let array = ArrayView::from_shape(IxDyn(self.shape), values)?;
        let selected = array.select(Axis(self.axis), self.indices);
        // Iteration is in logical (row-major) order whatever the memory layout.
        Ok(T::wrap(selected.iter().copied().collect()))
    }
}

/// Returns an array index in numpy semantics clamped to `0..=length`.
///
/// Negative indices count from the end of the axis.
fn to_clamped_index(index: i64, length: i64) -> i64 {
    if index < 0 {
        std::cmp::max(index + length, 0)
    } else {
        std::cmp::min(index, length)
    }
}

/// Returns the indices selected by a slice with numpy semantics.
///
/// Out of range bounds are clamped rather than rejected. With a negative stride the default start
/// is the last element and the default end is before the first.
fn slice_indices(
    lower: Option<i64>,
    upper: Option<i64>,
    stride: Option<i64>,
    length: usize,
) -> Vec<usize> {
    let length = length as i64;
    let stride = stride.unwrap_or(1);
    if stride > 0 {
        let start = to_clamped_index(lower.unwrap_or(0), length);
        let end = to_clamped_index(upper.unwrap_or(length), length);
        (start..end)
            .step_by(stride as usize)
            .map(|i| i as usize)
            .collect()
    } else if stride < 0 {
        let start = match lower {
            None => length - 1,
            Some(i) if i < 0 => i + length,
            Some(i) => std::cmp::min(i, length - 1),
        };
        let end = match upper {
            None => -1,
            Some(i) if i < 0 => std::cmp::max(i + length, -1),
            Some(i) => std::cmp::min(i, length - 1),
        };
        let mut indices = vec![];
        let mut i = start;
        while i > end && i >= 0 {
            indices.push(i as usize);
            i += stride;
        }
        indices
    } else {
        vec![]
    }
}

/// Returns the indices of `coords` satisfying `comparison` against `bound`.
///
/// An approximate match with no exact hit takes the nearest coordinate, provided the bound lies
/// within the coordinate range.
fn compare_indices(coords: &[f64], comparison: Comparison, bound: f64) -> Vec<usize> {
    let indices: Vec<usize> = coords
        .iter()
        .enumerate()
        .filter(|(_, coord)| comparison.matches(**coord, bound))
        .map(|(i, _)| i)
        .collect();
    if !indices.is_empty() || comparison != Comparison::Approx {
        return indices;
    }
    let lowest = coords.iter().copied().fold(f64::INFINITY, f64::min);
    let highest = coords.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if bound < lowest || bound > highest {
        return vec![];
    }
    coords
        .iter()
        .enumerate()
        .filter(|(_, coord)| !coord.is_nan())
        .min_by(|(_, x), (_, y)| {
            (**x - bound)
                .abs()
                .partial_cmp(&(**y - bound).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| vec![i])
        .unwrap_or_default()
}

/// Returns the indices of dimension `subset.dimid` selected by `subset`, or `None` to keep the
/// whole dimension.
fn selected_indices(
    block: &DataBlock,
    subset: &SubsetDim,
) -> Result<Option<Vec<usize>>, CorrectionError> {
    let shape = block.shape();
    let Some(&length) = shape.get(subset.dimid) else {
        return Err(CorrectionError::InvalidDimension {
            dimid: subset.dimid,
            rank: shape.len(),
        });
    };
    let indices = match subset.operation {
        SubsetOperation::All => return Ok(None),
        SubsetOperation::Slice => slice_indices(subset.lower, subset.upper, subset.stride, length),
        SubsetOperation::Last => (length.checked_sub(1)).into_iter().collect(),
        SubsetOperation::Compare(comparison) => {
            let dim =
                block
                    .dims
                    .get(subset.dimid)
                    .ok_or(CorrectionError::InvalidDimension {
                        dimid: subset.dimid,
                        rank: block.rank(),
                    })?;
            let bound = subset.bound.unwrap_or_default();
            compare_indices(&dim.coordinates(), comparison, bound)
        }
    };
    if indices.is_empty() {
        return Err(CorrectionError::NoSubsetMatch {
            operation: subset.to_string(),
            dimid: subset.dimid,
        });
    }
    Ok(Some(indices))
}

/// Fail unless `buffer` is empty or holds exactly `expected` values.
fn check_length(buffer: &Buffer, expected: usize, what: &str) -> Result<(), CorrectionError> {
    match buffer.values() {
        Some(values) if values.len() != expected => Err(CorrectionError::BufferLength {
            buffer: what.to_string(),
            length: values.len(),
            expected,
        }),
        _ => Ok(()),
    }
}

fn check_errors(errors: &ErrorData, expected: usize, what: &str) -> Result<(), CorrectionError> {
    check_length(&errors.hi, expected, &format!("{what} error"))?;
    check_length(&errors.lo, expected, &format!("{what} lower error"))
}

/// Select along `axis` of a buffer holding `shape` values, in place.
fn select_buffer(
    buffer: &mut Buffer,
    shape: &[usize],
    axis: usize,
    indices: &[usize],
) -> Result<(), CorrectionError> {
    let Some(values) = buffer.values() else {
        return Ok(());
    };
    let selected = visit(
        values,
        Select {
            shape,
            axis,
            indices,
        },
    )?;
    buffer.replace(Buffer::new(selected));
    Ok(())
}

fn select_errors(
    errors: &mut ErrorData,
    shape: &[usize],
    axis: usize,
    indices: &[usize],
) -> Result<(), CorrectionError> {
    select_buffer(&mut errors.hi, shape, axis, indices)?;
    select_buffer(&mut errors.lo, shape, axis, indices)
}

/// Returns the step between `indices` if they are evenly spaced.
fn even_step(indices: &[usize]) -> Option<i64> {
    let step = match indices {
        [first, second, ..] => *second as i64 - *first as i64,
        _ => 1,
    };
    indices
        .windows(2)
        .all(|pair| pair[1] as i64 - pair[0] as i64 == step)
        .then_some(step)
}

/// Select `indices` from a dimension's coordinates.
///
/// Evenly spaced selections from a regular grid stay compressed.
fn select_dim(dim: &mut Dim, indices: &[usize]) -> Result<(), CorrectionError> {
    let shape = [dim.dim_n];
    let regular = match (&dim.coords, even_step(indices)) {
        (DimCoords::Compressed(Compression::Regular { start, step }), Some(stride)) => {
            Some((*start, *step, stride))
        }
        _ => None,
    };
    if let Some((start, step, stride)) = regular {
        let first = indices.first().copied().unwrap_or_default() as f64;
        dim.coords = DimCoords::Compressed(Compression::Regular {
            start: start + first * step,
            step: step * stride as f64,
        });
    } else {
        dim.decompress();
        if let DimCoords::Raw(buffer) = &mut dim.coords {
            select_buffer(buffer, &shape, 0, indices)?;
        }
    }
    select_errors(&mut dim.errors, &shape, 0, indices)?;
    dim.dim_n = indices.len();
    Ok(())
}

/// Reduce a block to `indices` along `axis`: data, errors and the dimension together.
fn select_axis(
    block: &mut DataBlock,
    axis: usize,
    indices: &[usize],
) -> Result<(), CorrectionError> {
    let shape = block.shape();
    let count = shape.iter().product();
    check_length(&block.data, count, "data")?;
    check_errors(&block.errors, count, "data")?;
    if let Some(dim) = block.dims.get(axis) {
        if let DimCoords::Raw(buffer) = &dim.coords {
            check_length(buffer, dim.dim_n, &format!("dimension {axis}"))?;
        }
        check_errors(&dim.errors, dim.dim_n, &format!("dimension {axis}"))?;
    }
    select_buffer(&mut block.data, &shape, axis, indices)?;
    select_errors(&mut block.errors, &shape, axis, indices)?;
    if let Some(dim) = block.dims.get_mut(axis) {
        select_dim(dim, indices)?;
    }
    Ok(())
}

/// Remove dimension `dimid`, keeping the order dimension consistent.
fn remove_dim(block: &mut DataBlock, dimid: usize) {
    if dimid >= block.dims.len() {
        return;
    }
    block.dims.remove(dimid);
    block.order = match block.order {
        Some(order) if order == dimid => None,
        Some(order) if order > dimid => Some(order - 1),
        order => order,
    };
}

/// Extract the numeric array `member` from the block's structured result.
fn extract_member(block: &mut DataBlock, member: &str) -> Result<(), CorrectionError> {
    let value = block
        .opaque
        .as_ref()
        .and_then(|opaque| opaque.get(member))
        .ok_or_else(|| CorrectionError::MemberNotFound(member.to_string()))?;
    let values = serde_json::from_value::<Values>(value.clone())
        .or_else(|_| serde_json::from_value::<Vec<f64>>(value.clone()).map(Values::Float64))
        .map_err(|_| CorrectionError::MemberNotFound(member.to_string()))?;
    block.data.replace(Buffer::new(values));
    block.errors = ErrorData::default();
    block.dims.clear();
    block.order = None;
    block.opaque = None;
    Ok(())
}

/// A parsed subset function call such as `minimum(dimid=0)`.
struct FunctionCall {
    name: String,
    dimid: Option<usize>,
}

impl FunctionCall {
    fn parse(function: &str) -> Result<Self, CorrectionError> {
        let unsupported = || CorrectionError::UnsupportedFunction(function.to_string());
        let function = function.trim();
        let (name, arguments) = match function.split_once('(') {
            Some((name, rest)) => (
                name,
                rest.trim_end().strip_suffix(')').ok_or_else(unsupported)?,
            ),
            None => (function, ""),
        };
        let name_values = parse_name_values(arguments, true).map_err(|_| unsupported())?;
        let dimid = match name_values
            .iter()
            .find(|nv| nv.name.eq_ignore_ascii_case("dimid"))
        {
            Some(nv) => Some(nv.value.trim().parse::<usize>().map_err(|_| unsupported())?),
            None => None,
        };
        Ok(Self {
            name: name.trim().to_ascii_lowercase(),
            dimid,
        })
    }
}

fn reduce(
    block: &mut DataBlock,
    reduction: Reduction,
    axis: Option<usize>,
) -> Result<(), CorrectionError> {
    let shape = block.shape();
    let Some(values) = block.data.values() else {
        return Ok(());
    };
    let (reduced, _) = visit(
        values,
        Reduce {
            reduction,
            shape: &shape,
            axis,
        },
    )?;
    block.data.replace(Buffer::new(reduced));
    block.errors = ErrorData::default();
    match axis {
        Some(axis) => remove_dim(block, axis),
        None => {
            block.dims.clear();
            block.order = None;
        }
    }
    Ok(())
}

fn apply_function(block: &mut DataBlock, function: &str) -> Result<(), CorrectionError> {
    let call = FunctionCall::parse(function)?;
    match call.name.as_str() {
        "abs" => {
            if let Some(values) = block.data.values_mut() {
                Abs.execute(values)?;
            }
        }
        "minimum" => reduce(block, Reduction::Minimum, call.dimid)?,
        "maximum" => reduce(block, Reduction::Maximum, call.dimid)?,
        "count" => reduce(block, Reduction::Count, call.dimid)?,
        "order" => {
            let dimid = call
                .dimid
                .ok_or_else(|| CorrectionError::UnsupportedFunction(function.to_string()))?;
            set_order(block, dimid)?;
        }
        _ => return Err(CorrectionError::UnsupportedFunction(function.to_string())),
    }
    Ok(())
}

fn set_order(block: &mut DataBlock, order: usize) -> Result<(), CorrectionError> {
    if order >= block.rank() {
        return Err(CorrectionError::InvalidDimension {
            dimid: order,
            rank: block.rank(),
        });
    }
    block.order = Some(order);
    Ok(())
}

/// Apply a subset action to a corrected data block.
///
/// The member is extracted first, then each selection is applied in turn, followed by the
/// function, reform and order override.
pub fn apply_subset(block: &mut DataBlock, action: &SubsetAction) -> Result<(), CorrectionError> {
    if !action.member.is_empty() {
        extract_member(block, &action.member)?;
    }
    for subset in &action.subset.dims {
        if let Some(indices) = selected_indices(block, subset)? {
            select_axis(block, subset.dimid, &indices)?;
        }
    }
    if !action.function.trim().is_empty() {
        apply_function(block, &action.function)?;
    }
    if action.reform {
        let mut dimid = block.dims.len();
        while dimid > 0 {
            dimid -= 1;
            if block.dims[dimid].dim_n == 1 {
                remove_dim(block, dimid);
            }
        }
    }
    if let Some(order) = action.order {
        set_order(block, order)?;
    }
    Ok(())
}
