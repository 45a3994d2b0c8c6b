use thiserror::Error;

/// Failure talking to the state store over HTTP.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("invalid server url '{0}'")]
    InvalidUrl(String),
}

impl TransportError {
    /// Network failures and server-side errors may succeed on a later attempt;
    /// a rejected request will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Decode(_) | TransportError::InvalidUrl(_) => false,
        }
    }
}
