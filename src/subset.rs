//! Bracketed subset grammar.
//!
//! A subset is a sequence of bracket groups such as `[0:10][*, 2]`. Each comma separated group
//! selects from one dimension, in order:
//!
//! * `*`, `:` or nothing selects the whole dimension
//! * `a` selects the single index `a`
//! * `a:b` selects `a <= i < b`
//! * `a:b:c` adds a stride `c`
//! * `#` selects the last element
//! * `>=1.5`, `lt 3` etc. select by comparing the dimension's coordinate values
//!
//! Missing or `*` fields within a group are absent, not zero.

use crate::error::ParseError;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of dimensions of a data block.
pub const MAX_DATA_RANK: usize = 8;

lazy_static! {
    static ref BRACKET: Regex = Regex::new(r"\[([^\[\]]*)\]").unwrap();
}

/// Comparison between a dimension coordinate and a bound.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Exact match, or the nearest interior coordinate if none matches
    Approx,
}

impl Comparison {
    // Longest symbols first so that `<=` is not read as `<`.
    const SYMBOLS: [(&'static str, Comparison); 10] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("~=", Comparison::Approx),
        ("!<", Comparison::Ge),
        ("!>", Comparison::Le),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
        ("=", Comparison::Eq),
    ];

    const WORDS: [(&'static str, Comparison); 6] = [
        ("lt", Comparison::Lt),
        ("le", Comparison::Le),
        ("gt", Comparison::Gt),
        ("ge", Comparison::Ge),
        ("eq", Comparison::Eq),
        ("ne", Comparison::Ne),
    ];

    /// Split a leading comparison operator from `text`, returning it with the remainder.
    pub fn split(text: &str) -> Option<(Comparison, &str)> {
        let lower = text.to_ascii_lowercase();
        Self::SYMBOLS
            .iter()
            .chain(Self::WORDS.iter())
            .find(|(symbol, _)| lower.starts_with(symbol))
            .map(|(symbol, comparison)| (*comparison, text[symbol.len()..].trim()))
    }

    /// Returns the canonical symbol of the comparison.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Approx => "~=",
        }
    }

    /// Returns whether `value` satisfies the comparison against `bound`.
    pub fn matches(self, value: f64, bound: f64) -> bool {
        match self {
            Self::Lt => value < bound,
            Self::Le => value <= bound,
            Self::Gt => value > bound,
            Self::Ge => value >= bound,
            Self::Eq | Self::Approx => value == bound,
            Self::Ne => value != bound,
        }
    }
}

/// How a subset selects from one dimension.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetOperation {
    /// Index range with optional bounds and stride
    Slice,
    /// Whole dimension
    All,
    /// Last element only
    Last,
    /// Coordinates satisfying a comparison with the bound
    Compare(Comparison),
}

/// Selection from a single dimension.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SubsetDim {
    /// Dimension the selection applies to
    pub dimid: usize,
    pub operation: SubsetOperation,
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub stride: Option<i64>,
    /// Comparison bound
    pub bound: Option<f64>,
}

impl SubsetDim {
    /// Returns a selection of the whole of dimension `dimid`.
    pub fn all(dimid: usize) -> Self {
        Self {
            dimid,
            operation: SubsetOperation::All,
            lower: None,
            upper: None,
            stride: None,
            bound: None,
        }
    }

    /// Returns an index range selection.
    pub fn slice(dimid: usize, lower: Option<i64>, upper: Option<i64>, stride: Option<i64>) -> Self {
        Self {
            operation: SubsetOperation::Slice,
            lower,
            upper,
            stride,
            ..Self::all(dimid)
        }
    }

    /// Returns a comparison selection.
    pub fn compare(dimid: usize, comparison: Comparison, bound: f64) -> Self {
        Self {
            operation: SubsetOperation::Compare(comparison),
            bound: Some(bound),
            ..Self::all(dimid)
        }
    }

    /// Parse a single group, the text between commas inside a bracket.
    pub fn parse(group: &str, dimid: usize) -> Result<Self, ParseError> {
        let group = group.trim();
        match group {
            "" | "*" => return Ok(Self::all(dimid)),
            "#" => {
                return Ok(Self {
                    operation: SubsetOperation::Last,
                    ..Self::all(dimid)
                })
            }
            _ => {}
        }
        if let Some((comparison, value)) = Comparison::split(group) {
            let bound = value
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidSubset(group.to_string()))?;
            return Ok(Self::compare(dimid, comparison, bound));
        }
        let fields: Vec<&str> = group.split(':').collect();
        match fields.as_slice() {
            [index] => {
                let lower = parse_index(index)?;
                let upper = lower.map(|lower| lower + 1);
                Ok(Self::slice(dimid, lower, upper, None))
            }
            [lower, upper] => Ok(Self::slice(
                dimid,
                parse_index(lower)?,
                parse_index(upper)?,
                None,
            )),
            [lower, upper, stride] => Ok(Self::slice(
                dimid,
                parse_index(lower)?,
                parse_index(upper)?,
                parse_index(stride)?,
            )),
            _ => Err(ParseError::InvalidSubset(group.to_string())),
        }
    }

    /// Build a selection from an operation string and an optional bound, as found in subset
    /// actions.
    ///
    /// The operation is either a bare comparison operator whose value is `bound`, or a group in
    /// bracket syntax.
    pub fn from_operation(
        dimid: usize,
        operation: &str,
        bound: Option<f64>,
    ) -> Result<Self, ParseError> {
        let operation = operation.trim();
        if let (Some((comparison, "")), Some(bound)) = (Comparison::split(operation), bound) {
            return Ok(Self::compare(dimid, comparison, bound));
        }
        let group = operation
            .strip_prefix('[')
            .and_then(|op| op.strip_suffix(']'))
            .unwrap_or(operation);
        Self::parse(group, dimid)
    }
}

/// Parse an optional index field.
fn parse_index(field: &str) -> Result<Option<i64>, ParseError> {
    match field.trim() {
        "" | "*" => Ok(None),
        field => field
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidInteger(field.to_string())),
    }
}

impl fmt::Display for SubsetDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(value: Option<i64>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }
        match self.operation {
            SubsetOperation::All => write!(f, "*"),
            SubsetOperation::Last => write!(f, "#"),
            SubsetOperation::Compare(comparison) => {
                write!(f, "{}{}", comparison.symbol(), self.bound.unwrap_or_default())
            }
            SubsetOperation::Slice => {
                write!(f, "{}:{}", field(self.lower), field(self.upper))?;
                if self.stride.is_some() {
                    write!(f, ":{}", field(self.stride))?;
                }
                Ok(())
            }
        }
    }
}

/// Parsed subset: one selection per dimension.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Subset {
    pub dims: Vec<SubsetDim>,
}

impl Subset {
    /// Parse a sequence of bracket groups such as `[0:10][2]` or `[0:10, 2]`.
    ///
    /// An empty string yields an empty subset.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.trim();
        let mut dims = vec![];
        let mut consumed = 0;
        for captures in BRACKET.captures_iter(text) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if !text[consumed..whole.start()].trim().is_empty() {
                return Err(ParseError::InvalidSubset(text.to_string()));
            }
            consumed = whole.end();
            for group in inner.as_str().split(',') {
                dims.push(SubsetDim::parse(group, dims.len())?);
            }
        }
        if !text[consumed..].trim().is_empty() {
            return Err(ParseError::InvalidSubset(text.to_string()));
        }
        let subset = Self { dims };
        subset.check_rank()?;
        Ok(subset)
    }

    /// Returns an error if there are more selections than the maximum data rank.
    pub fn check_rank(&self) -> Result<(), ParseError> {
        if self.dims.len() > MAX_DATA_RANK {
            return Err(ParseError::TooManyDimensions {
                count: self.dims.len(),
                max: MAX_DATA_RANK,
            });
        }
        Ok(())
    }

    /// Number of selections parsed.
    pub fn nbound(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }
}

impl fmt::Display for Subset {
    /// Render the subset in bracket form, one bracket per dimension.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.dims {
            write!(f, "[{}]", dim)?;
        }
        Ok(())
    }
}
