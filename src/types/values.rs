//! Typed numeric buffers.

use crate::operation::{self, Element, NumVisitor};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i8]
    Int8,
    /// [i16]
    Int16,
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u8]
    Uint8,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int8 => std::mem::size_of::<i8>(),
            Self::Int16 => std::mem::size_of::<i16>(),
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint8 => std::mem::size_of::<u8>(),
            Self::Uint16 => std::mem::size_of::<u16>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }

    /// Returns whether this is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// A vector of numeric values of one of the supported data types.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum Values {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

struct Len {}

impl NumVisitor for Len {
    type Output = usize;

    fn visit_t<T: Element>(self, values: &[T]) -> usize {
        values.len()
    }
}

struct ToF64 {}

impl NumVisitor for ToF64 {
    type Output = Vec<f64>;

    fn visit_t<T: Element>(self, values: &[T]) -> Vec<f64> {
        values.iter().map(|value| value.as_()).collect()
    }
}

fn cast<T: Element>(values: &[f64]) -> Vec<T> {
    values.iter().copied().map(T::from_f64).collect()
}

impl Values {
    /// Returns the data type of the values.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Uint8(_) => DType::Uint8,
            Self::Uint16(_) => DType::Uint16,
            Self::Uint32(_) => DType::Uint32,
            Self::Uint64(_) => DType::Uint64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        operation::visit(self, Len {})
    }

    /// Returns whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build values of type `dtype` from `f64` values, saturating integer types.
    pub fn from_f64(dtype: DType, values: &[f64]) -> Self {
        match dtype {
            DType::Int8 => Self::Int8(cast(values)),
            DType::Int16 => Self::Int16(cast(values)),
            DType::Int32 => Self::Int32(cast(values)),
            DType::Int64 => Self::Int64(cast(values)),
            DType::Uint8 => Self::Uint8(cast(values)),
            DType::Uint16 => Self::Uint16(cast(values)),
            DType::Uint32 => Self::Uint32(cast(values)),
            DType::Uint64 => Self::Uint64(cast(values)),
            DType::Float32 => Self::Float32(cast(values)),
            DType::Float64 => Self::Float64(cast(values)),
        }
    }

    /// Returns the values converted to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        operation::visit(self, ToF64 {})
    }
}

impl<T: Element> From<Vec<T>> for Values {
    fn from(values: Vec<T>) -> Self {
        T::wrap(values)
    }
}

/// An owned, possibly empty, slot holding a numeric buffer.
///
/// Buffers are moved between data blocks with [Buffer::take], which leaves the source slot empty.
/// Assigning a new buffer to an occupied slot drops the previous occupant first. There is no
/// `Clone`; a buffer has exactly one owner.
#[derive(Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Buffer(Option<Values>);

impl Buffer {
    /// Returns a buffer owning `values`.
    pub fn new(values: Values) -> Self {
        Self(Some(values))
    }

    /// Returns an empty buffer.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Move the contents out, leaving this slot empty.
    pub fn take(&mut self) -> Buffer {
        Buffer(self.0.take())
    }

    /// Store `other` in this slot, releasing the current contents.
    pub fn replace(&mut self, other: Buffer) {
        self.0 = None;
        self.0 = other.0;
    }

    /// Returns a reference to the values, if any.
    pub fn values(&self) -> Option<&Values> {
        self.0.as_ref()
    }

    /// Returns a mutable reference to the values, if any.
    pub fn values_mut(&mut self) -> Option<&mut Values> {
        self.0.as_mut()
    }

    /// Consume the buffer, returning its values.
    pub fn into_values(self) -> Option<Values> {
        self.0
    }

    /// Returns the number of elements, or zero for an empty slot.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, Values::len)
    }

    /// Returns whether the slot is empty or holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the slot holds a buffer (possibly of zero length).
    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    /// Returns the data type of the contents, if any.
    pub fn dtype(&self) -> Option<DType> {
        self.0.as_ref().map(Values::dtype)
    }
}

impl From<Values> for Buffer {
    fn from(values: Values) -> Self {
        Self::new(values)
    }
}
