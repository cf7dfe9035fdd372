//! Error handling.

use crate::actions::ActionType;
use crate::types::DType;

use axum::{
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// Signal or source address parse error
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// Neither a signal nor a source was given
    #[error("neither data object nor source specified")]
    EmptyRequest,

    /// Source string does not match the source grammar
    #[error("invalid source {0:?}")]
    InvalidSource(String),

    /// Source has more than two prefix tokens
    #[error("invalid source - too many prefixes in {0:?}")]
    TooManyPrefixes(String),

    /// Signal string does not match the signal grammar
    #[error("invalid signal {0:?}")]
    InvalidSignal(String),

    /// Malformed name-value token
    #[error("invalid token {0:?}")]
    InvalidToken(String),

    /// Name-value list starts or ends with `=`
    #[error("name-value syntax error in {0:?}")]
    NameValueSyntax(String),

    /// Subset field that is not an integer
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    /// Subset group that does not match the subset grammar
    #[error("invalid subset {0:?}")]
    InvalidSubset(String),

    /// More subset groups than the maximum data rank
    #[error("too many subset dimensions ({count} > {max})")]
    TooManyDimensions { count: usize, max: usize },

    /// String exceeding the capacity of its field
    #[error("string is too long ({field}: {length} > {max})")]
    StringTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    /// Integer exceeding the capacity of its field
    #[error("int is too large ({field}: {value})")]
    IntTooLarge { field: &'static str, value: i64 },

    /// Placeholder without a matching pass value
    #[error("no value for placeholder {0:?}")]
    UnmatchedPlaceholder(String),

    /// `~` or `~user` path prefix that cannot be expanded
    #[error("failed to expand path {path:?}: {reason}")]
    PathExpansion { path: String, reason: String },
}

/// Correction metadata XML error
#[derive(Debug, Error)]
pub enum XmlError {
    /// Document is not well formed
    #[error("malformed XML document")]
    Malformed(#[from] quick_xml::Error),

    /// Element attribute is not well formed
    #[error("malformed XML attribute")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// Document element is not `<action>`
    #[error("XML document root must be <action>, found <{0}>")]
    UnexpectedRoot(String),

    /// Document ends before all elements are closed
    #[error("XML document is truncated")]
    Truncated,

    /// Attribute or element value could not be parsed
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },
}

/// Recursion depth exceeded while resolving derived or substitute data
#[derive(Debug, Error, PartialEq)]
#[error("Recursive Depth (Derived or Substitute Data) Exceeds Internal Limit ({limit})")]
pub struct RangeError {
    pub limit: usize,
}

/// Data could not be spliced into its destination
#[derive(Debug, Error, PartialEq)]
pub enum SubstitutionError {
    /// Error data does not match the block it is substituted into
    #[error("Error Data Substitution Not Possible - Incompatible Lengths ({found} != {expected})")]
    ErrorLengths { expected: usize, found: usize },

    /// Dimension data does not match the dimension it is substituted into
    #[error(
        "Dimension Data Substitution Not Possible - Incompatible Lengths ({found} != {expected})"
    )]
    DimensionLengths { expected: usize, found: usize },

    /// Substitution refers to a dimension outside the rank of the block
    #[error("Dimension Data Substitution Not Possible - dimension {dimid} outside rank {rank}")]
    DimensionOutOfRange { dimid: usize, rank: usize },
}

/// No plugin could be found for a request
#[derive(Debug, Error, PartialEq)]
pub enum PluginResolutionError {
    /// Format string does not name a registered plugin
    #[error("File Format NOT Recognised: {0:?}")]
    UnknownFormat(String),

    /// Format of a composite dimension signal does not name a registered plugin
    #[error("User Specified Composite Dimension Data Signal's File Format NOT Recognised: {0:?}")]
    UnknownDimensionFormat(String),

    /// Request names a function of an unregistered plugin
    #[error("no plugin registered for request {0:?}")]
    UnresolvedRequest(String),

    /// Generic request without a metadata catalogue
    #[error("no metadata catalogue registered for generic requests")]
    NoMetadataPlugin,

    /// Plugin id is not in the registry
    #[error("unknown plugin id {0}")]
    UnknownPluginId(usize),
}

/// Data access error raised by a plugin
#[derive(Debug, Error)]
pub enum PluginError {
    /// Signal not known to the plugin
    #[error("signal {signal:?} not found for {location:?}")]
    NotFound { signal: String, location: String },

    /// Error reading a file
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    /// Error decoding a file
    #[error("failed to decode {path}")]
    Json {
        path: String,
        #[source]
        error: serde_json::Error,
    },

    /// Plugin-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Error applying corrections to a data block
#[derive(Debug, Error)]
pub enum CorrectionError {
    /// Length mismatch while substituting data
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    /// Action could not be applied (strict mode only)
    #[error("{action} action {id} not applied: {reason}")]
    Skipped {
        action: ActionType,
        id: i32,
        reason: String,
    },

    /// Operation not defined for the data type
    #[error("{operation} is not supported for {dtype} data")]
    UnsupportedDType {
        operation: &'static str,
        dtype: DType,
    },

    /// Subset refers to a dimension outside the rank of the block
    #[error("subset dimension {dimid} outside rank {rank}")]
    InvalidDimension { dimid: usize, rank: usize },

    /// No element satisfies a subset operation
    #[error("No Data were found that satisfies a subset ({operation} on dimension {dimid})")]
    NoSubsetMatch { operation: String, dimid: usize },

    /// Unknown subset function
    #[error("unsupported subset function {0:?}")]
    UnsupportedFunction(String),

    /// Structure member not present in the block
    #[error("structure member {0:?} not found")]
    MemberNotFound(String),

    /// Data do not match the shape of the block
    #[error("data do not match the block shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Buffer whose length does not match the shape it is subset with
    #[error("{buffer} has {length} values but the block shape requires {expected}")]
    BufferLength {
        buffer: String,
        length: usize,
        expected: usize,
    },
}

/// Signal resolution error
///
/// The outermost caller receives exactly one of these. Errors raised at any recursion level
/// propagate unchanged.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error(transparent)]
    PluginResolution(#[from] PluginResolutionError),

    #[error(transparent)]
    Correction(#[from] CorrectionError),

    /// Error fetching data from a plugin
    #[error("data access failed")]
    Plugin(#[from] PluginError),

    /// Composite signal without an in-range composite action
    #[error("Composite Data Signal Not Available - No XML Document to define it!")]
    CompositeUndefined,

    /// Composite action without file and format where they are required
    #[error("User Specified Composite Data Signal Not Fully Defined: Format?, File?")]
    CompositeIncomplete,
}

/// Signal resolver server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Error resolving a signal
    #[error("failed to resolve signal")]
    Resolution(#[from] ResolutionError),

    /// Error applying corrections
    #[error("failed to apply corrections")]
    Correction(#[from] CorrectionError),

    /// Error parsing correction metadata
    #[error("failed to parse correction metadata")]
    Xml(#[from] XmlError),

    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Resolution task failed to complete
    #[error("resolution task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl IntoResponse for ServiceError {
    /// Convert from a `ServiceError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<ServiceError> for ErrorResponse {
    /// Convert from a `ServiceError` into an `ErrorResponse`.
    fn from(error: ServiceError) -> Self {
        let response = match &error {
            // Bad request
            ServiceError::Correction(_)
            | ServiceError::Xml(_)
            | ServiceError::RequestDataJsonRejection(_)
            | ServiceError::RequestDataValidationSingle(_)
            | ServiceError::RequestDataValidation(_) => Self::bad_request(&error),

            // Internal server error
            ServiceError::SemaphoreAcquireError(_) | ServiceError::TaskJoin(_) => {
                Self::internal_server_error(&error)
            }

            ServiceError::Resolution(resolution_error) => {
                // Tailor the response based on the specific ResolutionError variant.
                match resolution_error {
                    ResolutionError::Parse(_)
                    | ResolutionError::Xml(_)
                    | ResolutionError::Range(_)
                    | ResolutionError::Substitution(_)
                    | ResolutionError::Correction(_)
                    | ResolutionError::CompositeUndefined
                    | ResolutionError::CompositeIncomplete => Self::bad_request(&error),

                    ResolutionError::PluginResolution(_)
                    | ResolutionError::Plugin(PluginError::NotFound { .. }) => {
                        Self::not_found(&error)
                    }

                    ResolutionError::Plugin(_) => Self::internal_server_error(&error),
                }
            }
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_service_error(
        error: ServiceError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn parse_error() {
        let error = ServiceError::Resolution(ParseError::TooManyPrefixes("a::b::c::1".into()).into());
        let message = "failed to resolve signal";
        let caused_by = Some(vec!["invalid source - too many prefixes in \"a::b::c::1\""]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn range_error() {
        let error = ServiceError::Resolution(RangeError { limit: 10 }.into());
        let message = "failed to resolve signal";
        let caused_by = Some(vec![
            "Recursive Depth (Derived or Substitute Data) Exceeds Internal Limit (10)",
        ]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn substitution_error() {
        let error = ServiceError::Resolution(
            SubstitutionError::DimensionLengths {
                expected: 7,
                found: 5,
            }
            .into(),
        );
        let message = "failed to resolve signal";
        let caused_by = Some(vec![
            "Dimension Data Substitution Not Possible - Incompatible Lengths (5 != 7)",
        ]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn plugin_resolution_error() {
        let error = ServiceError::Resolution(
            PluginResolutionError::UnknownFormat("netcdf".to_string()).into(),
        );
        let message = "failed to resolve signal";
        let caused_by = Some(vec!["File Format NOT Recognised: \"netcdf\""]);
        test_service_error(error, StatusCode::NOT_FOUND, message, caused_by).await;
    }

    #[tokio::test]
    async fn plugin_not_found() {
        let error = ServiceError::Resolution(
            PluginError::NotFound {
                signal: "ip".to_string(),
                location: "12345".to_string(),
            }
            .into(),
        );
        let message = "failed to resolve signal";
        let caused_by = Some(vec![
            "data access failed",
            "signal \"ip\" not found for \"12345\"",
        ]);
        test_service_error(error, StatusCode::NOT_FOUND, message, caused_by).await;
    }

    #[tokio::test]
    async fn plugin_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = ServiceError::Resolution(
            PluginError::Io {
                path: "/data/ip.json".to_string(),
                error: io_error,
            }
            .into(),
        );
        let message = "failed to resolve signal";
        let caused_by = Some(vec![
            "data access failed",
            "failed to read /data/ip.json",
            "no such file",
        ]);
        test_service_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn composite_undefined() {
        let error = ServiceError::Resolution(ResolutionError::CompositeUndefined);
        let message = "failed to resolve signal";
        let caused_by = Some(vec![
            "Composite Data Signal Not Available - No XML Document to define it!",
        ]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn correction_error() {
        let error = ServiceError::Correction(CorrectionError::UnsupportedFunction("foo".into()));
        let message = "failed to apply corrections";
        let caused_by = Some(vec!["unsupported subset function \"foo\""]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn xml_error() {
        let error = ServiceError::Xml(XmlError::UnexpectedRoot("signal".to_string()));
        let message = "failed to parse correction metadata";
        let caused_by = Some(vec!["XML document root must be <action>, found <signal>"]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn request_data_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = ServiceError::RequestDataValidationSingle(validation_error);
        let message = "request data is not valid";
        let caused_by = Some(vec!["Validation error: foo [{}]"]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn request_data_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = ServiceError::RequestDataValidation(validation_errors);
        let message = "request data is not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_service_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = ServiceError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        let message = "error acquiring resources";
        let caused_by = Some(vec!["semaphore closed"]);
        test_service_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }
}
