//! Agent link configuration

use std::time::Duration;

/// Agent link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Delay before dialing again after the link goes down
    pub retry_delay: Duration,
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl LinkConfig {
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();

        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builders() {
        let config = LinkConfig::default()
            .with_retry_delay(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_millis(250));

        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
