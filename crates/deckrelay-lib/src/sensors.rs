//! Xiaomi sensor gauges
//!
//! A small HTTP bridge on the LAN serves the latest reading of a Xiaomi
//! thermometer as `{"temperature": .., "humidity": .., "battery": ..}`. Replies are
//! cached briefly so gauges refreshing together cost a single request.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Bridge URL used when the panel configuration names none
pub const DEFAULT_SENSOR_URL: &str = "http://192.168.1.76:5000/api/current";

/// One gauge of the sensor reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    Temperature,
    Humidity,
    Battery,
}

impl SensorReading {
    /// Key in the bridge's reply
    pub fn field(&self) -> &'static str {
        match self {
            SensorReading::Temperature => "temperature",
            SensorReading::Humidity => "humidity",
            SensorReading::Battery => "battery",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Upper bound on one bridge request
    pub request_timeout: Duration,
    /// How long a reply is served from cache
    pub cache_ttl: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(5),
        }
    }
}

struct CachedReply {
    url: String,
    fetched_at: Instant,
    data: Value,
}

/// Cached client for the sensor bridge
pub struct SensorProxy {
    client: Client,
    config: SensorConfig,
    url: std::sync::Mutex<String>,
    cache: Mutex<Option<CachedReply>>,
}

impl SensorProxy {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            url: std::sync::Mutex::new(DEFAULT_SENSOR_URL.to_string()),
            cache: Mutex::new(None),
        }
    }

    pub fn url(&self) -> String {
        self.url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Point the proxy at another bridge; a cached reply from the old one is ignored
    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        debug!(url = %url, "Sensor bridge URL");
        *self.url.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
    }

    /// Latest bridge reply, from cache when fresh
    pub async fn current(&self) -> Result<Value, RelayError> {
        let url = self.url();
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.url == url && cached.fetched_at.elapsed() < self.config.cache_ttl {
                return Ok(cached.data.clone());
            }
        }

        let fetched_at = Instant::now();
        let data = self.fetch(&url).await.map_err(|e| {
            warn!(url = %url, error = %format!("{:#}", e), "Sensor bridge unreachable");
            RelayError::SensorUnreachable
        })?;

        *cache = Some(CachedReply {
            url,
            fetched_at,
            data: data.clone(),
        });
        Ok(data)
    }

    /// One gauge; `null` when the bridge reply lacks it
    pub async fn read(&self, reading: SensorReading) -> Result<Value, RelayError> {
        let data = self.current().await?;
        Ok(data.get(reading.field()).cloned().unwrap_or(Value::Null))
    }

    async fn fetch(&self, url: &str) -> Result<Value> {
        let body = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()
            .context("Bridge returned an error status")?
            .text()
            .await
            .context("Failed to read reply")?;

        serde_json::from_str(&body).context("Reply is not JSON")
    }
}
