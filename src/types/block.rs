//! Assembled data blocks and their dimensions.

use crate::types::values::{Buffer, DType, Values};

use serde::{Deserialize, Serialize};

/// Error data attached to a data block or dimension.
#[derive(Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ErrorData {
    /// Symmetric error, or the upper error when asymmetric
    #[serde(default)]
    pub hi: Buffer,
    /// Lower error, only used when asymmetric
    #[serde(default)]
    pub lo: Buffer,
    /// Whether the error is asymmetric
    #[serde(default)]
    pub asymmetric: bool,
}

impl ErrorData {
    /// Returns the data type of the error buffers, if any are present.
    pub fn dtype(&self) -> Option<DType> {
        self.hi.dtype().or_else(|| self.lo.dtype())
    }
}

/// An error model identifier and its parameters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ErrorModel {
    /// Error model id, 0 meaning none
    #[serde(default)]
    pub model: i32,
    /// Model parameters
    #[serde(default)]
    pub params: Vec<f32>,
}

/// Compressed dimension coordinate encodings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Compression {
    /// Method 0: a regular grid `start + i * step`
    Regular { start: f64, step: f64 },
    /// Method 1: domains of `lengths[i]` samples, each `starts[i] + j * intervals[i]`
    Domains {
        lengths: Vec<usize>,
        starts: Vec<f64>,
        intervals: Vec<f64>,
    },
    /// Method 2: one value per domain
    Starts { starts: Vec<f64> },
    /// Method 3: `domains` values `start + i * interval`
    Uniform {
        start: f64,
        interval: f64,
        domains: usize,
    },
}

impl Compression {
    /// Returns the legacy method number of the encoding.
    pub fn method(&self) -> u8 {
        match self {
            Self::Regular { .. } => 0,
            Self::Domains { .. } => 1,
            Self::Starts { .. } => 2,
            Self::Uniform { .. } => 3,
        }
    }

    /// Expand the encoding into `dim_n` coordinate values.
    pub fn expand(&self, dim_n: usize) -> Vec<f64> {
        let mut coords: Vec<f64> = match self {
            Self::Regular { start, step } => {
                (0..dim_n).map(|i| start + i as f64 * step).collect()
            }
            Self::Domains {
                lengths,
                starts,
                intervals,
            } => lengths
                .iter()
                .zip(starts.iter().zip(intervals))
                .flat_map(|(length, (start, interval))| {
                    (0..*length).map(move |j| start + j as f64 * interval)
                })
                .collect(),
            Self::Starts { starts } => starts.clone(),
            Self::Uniform {
                start,
                interval,
                domains,
            } => (0..*domains).map(|i| start + i as f64 * interval).collect(),
        };
        coords.truncate(dim_n);
        coords
    }
}

/// Coordinate values of a dimension: either raw or compressed, never both.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DimCoords {
    Raw(Buffer),
    Compressed(Compression),
}

impl Default for DimCoords {
    fn default() -> Self {
        Self::Raw(Buffer::empty())
    }
}

/// A single dimension of a data block.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct Dim {
    /// Data type of the coordinates
    pub dtype: DType,
    /// Number of coordinates
    pub dim_n: usize,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub units: String,
    /// Coordinate values
    #[serde(default)]
    pub coords: DimCoords,
    #[serde(default)]
    pub errors: ErrorData,
    #[serde(default)]
    pub error_model: ErrorModel,
}

impl Dim {
    /// Returns an uncompressed dimension holding `values`.
    pub fn raw(values: Values) -> Self {
        Self {
            dtype: values.dtype(),
            dim_n: values.len(),
            label: String::new(),
            units: String::new(),
            coords: DimCoords::Raw(Buffer::new(values)),
            errors: ErrorData::default(),
            error_model: ErrorModel::default(),
        }
    }

    /// Returns a compressed dimension.
    pub fn compressed(dtype: DType, dim_n: usize, compression: Compression) -> Self {
        Self {
            dtype,
            dim_n,
            label: String::new(),
            units: String::new(),
            coords: DimCoords::Compressed(compression),
            errors: ErrorData::default(),
            error_model: ErrorModel::default(),
        }
    }

    /// Returns a regular grid dimension (compression method 0).
    pub fn regular(dtype: DType, dim_n: usize, start: f64, step: f64) -> Self {
        Self::compressed(dtype, dim_n, Compression::Regular { start, step })
    }

    /// Returns a copy of the dimension with its label and units set.
    pub fn with_label(mut self, label: &str, units: &str) -> Self {
        self.label = label.to_string();
        self.units = units.to_string();
        self
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.coords, DimCoords::Compressed(_))
    }

    /// Returns the compression, if the dimension is compressed.
    pub fn compression(&self) -> Option<&Compression> {
        match &self.coords {
            DimCoords::Compressed(compression) => Some(compression),
            DimCoords::Raw(_) => None,
        }
    }

    /// Returns the coordinate values as `f64`, expanding any compression.
    pub fn coordinates(&self) -> Vec<f64> {
        match &self.coords {
            DimCoords::Raw(buffer) => buffer.values().map(Values::to_f64).unwrap_or_default(),
            DimCoords::Compressed(compression) => compression.expand(self.dim_n),
        }
    }

    /// Replace a compressed representation with the equivalent raw values.
    pub fn decompress(&mut self) {
        if let DimCoords::Compressed(compression) = &self.coords {
            let values = Values::from_f64(self.dtype, &compression.expand(self.dim_n));
            self.coords = DimCoords::Raw(Buffer::new(values));
        }
    }
}

/// A data block assembled for a signal.
///
/// Data are stored row-major over `dims`, so the last dimension varies fastest.
#[derive(Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DataBlock {
    /// Data values
    #[serde(default)]
    pub data: Buffer,
    #[serde(default)]
    pub errors: ErrorData,
    #[serde(default)]
    pub error_model: ErrorModel,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub description: String,
    /// One entry per rank
    #[serde(default)]
    pub dims: Vec<Dim>,
    /// Index of the time-like dimension
    #[serde(default)]
    pub order: Option<usize>,
    /// Structured result for plugins that do not return flat arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque: Option<serde_json::Value>,
}

impl DataBlock {
    /// Returns a rank 0 or 1 block holding `values`, without dimensions.
    pub fn new(values: Values) -> Self {
        Self {
            data: Buffer::new(values),
            ..Default::default()
        }
    }

    /// Returns the block with `dims` attached.
    pub fn with_dims(mut self, dims: Vec<Dim>) -> Self {
        self.dims = dims;
        self
    }

    /// Returns the block with the order dimension set.
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of data elements.
    pub fn data_n(&self) -> usize {
        self.data.len()
    }

    /// Data type of the data buffer, if present.
    pub fn dtype(&self) -> Option<DType> {
        self.data.dtype()
    }

    /// Returns the shape of the data, derived from the dimensions.
    ///
    /// A block without dimensions is treated as one-dimensional.
    pub fn shape(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            vec![self.data_n()]
        } else {
            self.dims.iter().map(|dim| dim.dim_n).collect()
        }
    }
}
