use deckrelay_connection::LinkError;
use deckrelay_device::DeviceError;
use thiserror::Error;

/// Errors surfaced by the relay gateway
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("PC agent not connected")]
    NotConnected,

    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    ConnectError(String),

    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("{0}")]
    RemoteError(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Xiaomi device unreachable")]
    SensorUnreachable,

    #[error("{message}")]
    LocalExecution { message: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Captured stderr of a failed local command
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RelayError::LocalExecution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<LinkError> for RelayError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NotConnected => RelayError::NotConnected,
            LinkError::Timeout => RelayError::Timeout,
            LinkError::Remote(message) => RelayError::RemoteError(message),
            LinkError::Encode(e) => RelayError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<DeviceError> for RelayError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::ConnectTimeout => RelayError::ConnectTimeout,
            DeviceError::ConnectError(message) => RelayError::ConnectError(message),
            DeviceError::InvalidArgument(message) => RelayError::InvalidRequest(message),
            DeviceError::Timeout => RelayError::Timeout,
            other => RelayError::Device(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_errors_keep_their_kind() {
        assert!(matches!(
            RelayError::from(LinkError::NotConnected),
            RelayError::NotConnected
        ));
        assert!(matches!(RelayError::from(LinkError::Timeout), RelayError::Timeout));

        let remote = RelayError::from(LinkError::Remote("File not found".to_string()));
        assert_eq!(remote.to_string(), "File not found");
    }

    #[test]
    fn test_device_errors_keep_their_kind() {
        assert!(matches!(
            RelayError::from(DeviceError::ConnectTimeout),
            RelayError::ConnectTimeout
        ));
        assert!(matches!(
            RelayError::from(DeviceError::ConnectError("refused".to_string())),
            RelayError::ConnectError(_)
        ));
        assert!(matches!(
            RelayError::from(DeviceError::InvalidArgument("Hue must be 0-359".to_string())),
            RelayError::InvalidRequest(_)
        ));
        assert!(matches!(
            RelayError::from(DeviceError::Command("unsupported".to_string())),
            RelayError::Device(_)
        ));
    }

    #[test]
    fn test_stderr_only_for_local_execution() {
        let err = RelayError::LocalExecution {
            message: "exit status 6".to_string(),
            stderr: "curl: (6) Could not resolve host".to_string(),
        };
        assert_eq!(err.stderr(), Some("curl: (6) Could not resolve host"));
        assert_eq!(RelayError::Timeout.stderr(), None);
    }
}
