use crate::error::CorrectionError;
use crate::types::{DType, Values};

/// Trait for array elements.
///
/// Implemented for each supported numeric type. Conversions to and from `f64` are saturating
/// `as` casts, which is how corrections on integer data are computed.
pub trait Element:
    Clone
    + Copy
    + Default
    + PartialOrd
    + num_traits::Bounded
    + Send
    + Sync
    + num_traits::AsPrimitive<f64>
    + std::fmt::Debug
    + 'static
{
    /// Runtime data type corresponding to this element type.
    const DTYPE: DType;

    /// Convert from `f64`, saturating for integer types.
    fn from_f64(value: f64) -> Self;

    /// Reciprocal of the value, with zero mapping to NaN.
    ///
    /// Returns `None` for integer types.
    fn reciprocal(self) -> Option<Self>;

    /// Absolute value of the element.
    fn abs(self) -> Self;

    /// Wrap a vector of elements into a [Values].
    fn wrap(values: Vec<Self>) -> Values;
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:ident, $abs:expr) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn reciprocal(self) -> Option<Self> {
                None
            }

            fn abs(self) -> Self {
                $abs(self)
            }

            fn wrap(values: Vec<Self>) -> Values {
                Values::$dtype(values)
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn reciprocal(self) -> Option<Self> {
                if self == 0.0 {
                    Some(<$t>::NAN)
                } else {
                    Some(1.0 / self)
                }
            }

            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            fn wrap(values: Vec<Self>) -> Values {
                Values::$dtype(values)
            }
        }
    };
}

impl_int_element!(i8, Int8, i8::saturating_abs);
impl_int_element!(i16, Int16, i16::saturating_abs);
impl_int_element!(i32, Int32, i32::saturating_abs);
impl_int_element!(i64, Int64, i64::saturating_abs);
impl_int_element!(u8, Uint8, std::convert::identity);
impl_int_element!(u16, Uint16, std::convert::identity);
impl_int_element!(u32, Uint32, std::convert::identity);
impl_int_element!(u64, Uint64, std::convert::identity);
impl_float_element!(f32, Float32);
impl_float_element!(f64, Float64);

/// Trait for in-place correction operations on a buffer of values.
///
/// This forms the contract between the correction engine and the numeric operations.
pub trait Operation {
    /// Execute the operation, modifying `values` in place.
    fn execute(&self, values: &mut Values) -> Result<(), CorrectionError>;
}

/// Trait for correction operations on numerical data.
///
/// This trait provides an entry point into the type system based on the runtime `dtype` value.
pub trait NumOperation {
    fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError>;
}

impl<O: NumOperation> Operation for O {
    /// Execute the operation.
    ///
    /// This method dispatches to `execute_t` based on the `dtype`.
    fn execute(&self, values: &mut Values) -> Result<(), CorrectionError> {
        // Convert runtime data type into concrete types.
        match values {
            Values::Int8(v) => self.execute_t::<i8>(v),
            Values::Int16(v) => self.execute_t::<i16>(v),
            Values::Int32(v) => self.execute_t::<i32>(v),
            Values::Int64(v) => self.execute_t::<i64>(v),
            Values::Uint8(v) => self.execute_t::<u8>(v),
            Values::Uint16(v) => self.execute_t::<u16>(v),
            Values::Uint32(v) => self.execute_t::<u32>(v),
            Values::Uint64(v) => self.execute_t::<u64>(v),
            Values::Float32(v) => self.execute_t::<f32>(v),
            Values::Float64(v) => self.execute_t::<f64>(v),
        }
    }
}

/// Trait for operations that read a buffer of values and produce a result.
///
/// Like [NumOperation], this is an entry point into the type system based on the runtime
/// `dtype` value.
pub trait NumVisitor {
    type Output;

    fn visit_t<T: Element>(self, values: &[T]) -> Self::Output;
}

/// Dispatch a [NumVisitor] on `values` based on its runtime data type.
pub fn visit<V: NumVisitor>(values: &Values, visitor: V) -> V::Output {
    match values {
        Values::Int8(v) => visitor.visit_t::<i8>(v),
        Values::Int16(v) => visitor.visit_t::<i16>(v),
        Values::Int32(v) => visitor.visit_t::<i32>(v),
        Values::Int64(v) => visitor.visit_t::<i64>(v),
        Values::Uint8(v) => visitor.visit_t::<u8>(v),
        Values::Uint16(v) => visitor.visit_t::<u16>(v),
        Values::Uint32(v) => visitor.visit_t::<u32>(v),
        Values::Uint64(v) => visitor.visit_t::<u64>(v),
        Values::Float32(v) => visitor.visit_t::<f32>(v),
        Values::Float64(v) => visitor.visit_t::<f64>(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestNumOp {}

    impl NumOperation for TestNumOp {
        fn execute_t<T: Element>(&self, values: &mut [T]) -> Result<(), CorrectionError> {
            // Overwrite every element with the size of the type parameter.
            for value in values.iter_mut() {
                *value = T::from_f64(std::mem::size_of::<T>() as f64);
            }
            Ok(())
        }
    }

    #[test]
    fn num_operation_u16() {
        let mut values = Values::Uint16(vec![1, 2, 3]);
        TestNumOp {}.execute(&mut values).unwrap();
        assert_eq!(Values::Uint16(vec![2, 2, 2]), values);
    }

    #[test]
    fn num_operation_f64() {
        let mut values = Values::Float64(vec![1.5]);
        TestNumOp {}.execute(&mut values).unwrap();
        assert_eq!(Values::Float64(vec![8.0]), values);
    }

    struct TypeName {}

    impl NumVisitor for TypeName {
        type Output = &'static str;

        fn visit_t<T: Element>(self, _values: &[T]) -> Self::Output {
            std::any::type_name::<T>()
        }
    }

    #[test]
    fn visit_i64() {
        assert_eq!("i64", visit(&Values::Int64(vec![]), TypeName {}));
    }

    #[test]
    fn visit_f32() {
        assert_eq!("f32", visit(&Values::Float32(vec![1.0]), TypeName {}));
    }

    #[test]
    fn from_f64_saturates() {
        assert_eq!(u8::MAX, u8::from_f64(300.0));
        assert_eq!(0_u8, u8::from_f64(-4.0));
        assert_eq!(i16::MIN, i16::from_f64(-1e9));
    }

    #[test]
    fn reciprocal() {
        assert_eq!(Some(0.5_f64), 2.0_f64.reciprocal());
        assert!(0.0_f32.reciprocal().unwrap().is_nan());
        assert_eq!(None, 2_i32.reciprocal());
    }

    #[test]
    fn element_dtype() {
        assert_eq!(DType::Uint32, <u32 as Element>::DTYPE);
        assert_eq!(DType::Float32, <f32 as Element>::DTYPE);
    }
}
