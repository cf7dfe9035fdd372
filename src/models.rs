//! Request, metadata and API data types

use crate::actions::ServerSide;
use crate::name_value::NameValue;
use crate::subset::Subset;
use crate::types::DataBlock;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Maximum length of an address string field.
pub const STRING_LENGTH: usize = 1024;

/// Default delimiter between address prefix tokens.
pub const DEFAULT_DELIMITER: &str = "::";

/// Default maximum depth of recursive resolution.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// How a request is to be satisfied
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Look up the signal in the metadata catalogue
    #[default]
    ReadGeneric,
    /// The signal is a literal XML composite definition
    ReadXml,
    /// Forward to another server
    ReadRemote,
    /// A function of a plugin that is not registered
    ReadUnknown,
    /// Call a registered plugin directly
    Plugin(usize),
}

/// A parsed signal and source address
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RequestData {
    pub request: RequestKind,
    /// Experiment (shot or pulse) number
    pub exp_number: i32,
    /// Pass number, -1 when absent or not numeric
    pub pass: i32,
    /// Pass text as given
    pub tpass: String,
    pub device: String,
    pub archive: String,
    pub format: String,
    pub path: String,
    pub file: String,
    pub server: String,
    /// Signal name, or the literal XML document for XML requests
    pub signal: String,
    pub source: String,
    pub function: String,
    pub delimiter: String,
    /// Subset text as given
    pub subset: String,
    pub datasubset: Subset,
    /// Function arguments
    pub name_values: Vec<NameValue>,
    /// Server-side subset requested through `ss::subset(...)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_side: Option<ServerSide>,
    /// Data sent with the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<serde_json::Value>,
}

impl RequestData {
    /// Returns the value of a named function argument, ignoring case.
    pub fn name_value(&self, name: &str) -> Option<&str> {
        self.name_values
            .iter()
            .find(|nv| nv.name.eq_ignore_ascii_case(name))
            .map(|nv| nv.value.as_str())
    }
}

/// Client request flags
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ClientBlock {
    /// Return data as stored, without corrections
    pub get_asis: bool,
    /// Do not calibrate data
    pub get_uncal: bool,
    /// Do not apply timing offsets
    pub get_notoff: bool,
    /// Do not return dimension data
    pub get_nodimdata: bool,
    /// Return data as double precision
    pub get_datadble: bool,
    /// Return dimension data as double precision
    pub get_dimdble: bool,
}

/// Server environment used during resolution
#[derive(Clone, Debug, PartialEq)]
pub struct Environment {
    /// Archive of signals without an archive prefix
    pub default_archive: String,
    /// Device stripped from the start of sources
    pub default_device: String,
    pub delimiter: String,
    /// Whether the server forwards generic requests
    pub proxy: bool,
    /// Maximum recursion depth of composite resolution
    pub max_depth: usize,
    /// Whether actions that cannot be applied are errors
    pub strict_corrections: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            default_archive: String::new(),
            default_device: String::new(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            proxy: false,
            max_depth: DEFAULT_MAX_DEPTH,
            strict_corrections: false,
        }
    }
}

/// Signal description type
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    #[default]
    Regular,
    /// Derived from other signals ('C')
    Composite,
    /// Chosen from alternatives by range ('S')
    Switched,
}

/// Catalogue description of a signal, valid across a range of experiments
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SignalDesc {
    pub signal_name: String,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Correction actions document
    pub xml: String,
    pub description: String,
}

/// Catalogue record of a signal for one experiment
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Signal {
    pub exp_number: i32,
    pub pass: i32,
    /// Correction actions document
    pub xml: String,
}

/// Catalogue record of where a signal's data are stored
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DataSource {
    pub exp_number: i32,
    pub pass: i32,
    pub path: String,
    pub filename: String,
    pub format: String,
    pub archive: String,
    pub device: String,
}

/// Catalogue metadata returned alongside data
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Metadata {
    pub signal_desc: SignalDesc,
    pub signal: Signal,
    pub data_source: DataSource,
}

impl Metadata {
    /// Whether the signal has any correction metadata.
    pub fn has_xml(&self) -> bool {
        !self.signal_desc.xml.trim().is_empty() || !self.signal.xml.trim().is_empty()
    }
}

/// Request body of the resolve API
#[derive(Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_resolve_request"))]
pub struct ResolveRequest {
    /// Signal address
    #[serde(default)]
    #[validate(length(max = 1024, message = "signal is too long"))]
    pub signal: String,
    /// Source address
    #[serde(default)]
    #[validate(length(max = 1024, message = "source is too long"))]
    pub source: String,
    /// Client flags
    #[serde(default)]
    pub client: ClientBlock,
}

/// Validate resolve request data
fn validate_resolve_request(request: &ResolveRequest) -> Result<(), ValidationError> {
    if request.signal.trim().is_empty() && request.source.trim().is_empty() {
        return Err(ValidationError::new(
            "neither data object nor source specified",
        ));
    }
    Ok(())
}

/// Request body of the apply API
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ApplyRequest {
    /// Data block to correct
    pub block: DataBlock,
    /// Signal description actions document
    #[serde(default)]
    pub signal_desc_xml: String,
    /// Signal actions document
    #[serde(default)]
    pub actions_xml: String,
    /// Experiment number used for range checks
    #[serde(default)]
    #[validate(range(min = 0, message = "exp_number must not be negative"))]
    pub exp_number: i32,
    /// Pass number used for range checks, -1 for any
    #[serde(default = "default_pass")]
    #[validate(range(min = -1, message = "pass must be -1 or greater"))]
    pub pass: i32,
    /// Client flags
    #[serde(default)]
    pub client: ClientBlock,
}

fn default_pass() -> i32 {
    -1
}

/// Response of the resolve API
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    /// Request id used in logs
    pub request_id: String,
    /// Catalogue metadata of the resolved signal
    pub metadata: Metadata,
    /// Corrected data
    pub block: DataBlock,
}
