use thiserror::Error;

/// Device session errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("Connection error: {0}")]
    ConnectError(String),

    #[error("Connection closed by device")]
    ConnectionClosed,

    #[error("Device did not answer in time")]
    Timeout,

    #[error("Device rejected command: {0}")]
    Command(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether the session that produced this error can no longer be trusted
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DeviceError::ConnectionClosed | DeviceError::Timeout | DeviceError::Io(_)
        )
    }
}
