use deckrelay_control::CorrelationError;
use thiserror::Error;

/// Agent link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("PC agent not connected")]
    NotConnected,

    #[error("Request timed out")]
    Timeout,

    #[error("Agent error: {0}")]
    Remote(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<CorrelationError> for LinkError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Timeout => LinkError::Timeout,
            // Only happens when the request was withdrawn because it never left
            CorrelationError::Cancelled => LinkError::NotConnected,
        }
    }
}
