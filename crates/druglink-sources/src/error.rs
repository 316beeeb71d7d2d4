//! Source errors.
//!
//! None of these reach the matcher's callers: the matcher turns every one of them
//! into a not-found result and logs it.

/// Errors from an external source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or the connection failed.
    #[error("Network error: {0}")]
    Network(String),

    /// The source answered with a non-success status.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// The response body did not match the expected schema.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The request did not finish in time.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The source is misconfigured (invalid URL, client build failure).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source is down or refused the request locally.
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Http(status.as_u16())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

impl From<url::ParseError> for SourceError {
    fn from(e: url::ParseError) -> Self {
        SourceError::InvalidConfig(e.to_string())
    }
}

pub type SourceResult<T> = Result<T, SourceError>;
