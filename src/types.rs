pub mod block;
pub mod values;

// Re-export types for convenience.
pub use crate::types::block::{Compression, DataBlock, Dim, DimCoords, ErrorData, ErrorModel};
pub use crate::types::values::{Buffer, DType, Values};
