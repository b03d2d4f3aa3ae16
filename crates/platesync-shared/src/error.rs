use thiserror::Error;

/// No usable response was obtained from the backend.
///
/// HTTP-level failures (4xx/5xx) are *not* transport errors; they come back
/// as a non-ok response for the caller to interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    /// Only produced by raw byte downloads, which have no body to hand back.
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("Realtime connection error: {0}")]
    Realtime(String),
}

/// A server record could not be turned into a local entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<NormalizeError> for TransportError {
    fn from(e: NormalizeError) -> Self {
        TransportError::MalformedBody(e.to_string())
    }
}
