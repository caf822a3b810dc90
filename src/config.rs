//! Queue configuration
//!
//! This module contains all tunables for the download queue: scheduling
//! limits, persistence timing, checksum selection and transport settings.

use crate::error::{QueueError, Result};
use crate::protocol::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the download queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum transfers running at once (worker slots)
    pub max_concurrent_downloads: usize,

    /// Delay before re-running a scheduling pass when all slots are busy
    pub retry_delay_ms: u64,

    /// Debounce window for snapshot writes
    pub persist_debounce_ms: u64,

    /// Delay between construction and the snapshot restore attempt
    pub restore_delay_ms: u64,

    /// Minimum interval between progress callbacks for one transfer
    pub progress_interval_ms: u64,

    /// Durable key the queue snapshot is stored under
    pub snapshot_key: String,

    /// Digest recorded for completed files
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Database path for the metadata and snapshot store
    pub database_path: Option<PathBuf>,

    /// Headers attached to every transfer (e.g. authorization)
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// HTTP transport configuration
    pub http: HttpConfig,
}

/// HTTP-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Read timeout in seconds
    pub read_timeout: u64,

    /// Maximum redirects to follow
    pub max_redirects: usize,

    /// User agent sent with every request
    pub user_agent: String,

    /// Whether to accept invalid TLS certificates (dangerous!)
    pub accept_invalid_certs: bool,

    /// Proxy URL (e.g., "http://proxy:8080" or "socks5://proxy:1080")
    pub proxy_url: Option<String>,
}

fn default_checksum_algorithm() -> ChecksumAlgorithm {
    ChecksumAlgorithm::Sha1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            retry_delay_ms: 100,
            persist_debounce_ms: 2000,
            restore_delay_ms: 500,
            progress_interval_ms: 200,
            snapshot_key: "download_queue_state".to_string(),
            checksum_algorithm: default_checksum_algorithm(),
            database_path: None,
            headers: Vec::new(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 60,
            max_redirects: 10,
            user_agent: format!("dlqueue/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: false,
            proxy_url: None,
        }
    }
}

impl QueueConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent downloads
    pub fn max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Set the busy-slot retry delay
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the snapshot debounce window
    pub fn persist_debounce_ms(mut self, ms: u64) -> Self {
        self.persist_debounce_ms = ms;
        self
    }

    /// Set the startup restore delay
    pub fn restore_delay_ms(mut self, ms: u64) -> Self {
        self.restore_delay_ms = ms;
        self
    }

    /// Set the progress callback interval
    pub fn progress_interval_ms(mut self, ms: u64) -> Self {
        self.progress_interval_ms = ms;
        self
    }

    /// Set the snapshot key
    pub fn snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    /// Set the checksum algorithm used for completed files
    pub fn checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    /// Set the database path for persistence
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Add a header sent with every transfer
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a bearer token as the authorization header
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    /// Set the user agent
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.http.user_agent = ua.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(QueueError::invalid_input(
                "max_concurrent_downloads",
                "Must be at least 1",
            ));
        }

        if self.snapshot_key.trim().is_empty() {
            return Err(QueueError::invalid_input(
                "snapshot_key",
                "Must not be empty",
            ));
        }

        if self.progress_interval_ms == 0 {
            return Err(QueueError::invalid_input(
                "progress_interval_ms",
                "Must be at least 1",
            ));
        }

        if let Some(ref proxy) = self.http.proxy_url {
            url::Url::parse(proxy).map_err(|e| {
                QueueError::invalid_input("proxy_url", format!("Invalid proxy URL: {}", e))
            })?;
        }

        for (name, _) in &self.headers {
            if name.trim().is_empty() {
                return Err(QueueError::invalid_input("headers", "Header name is empty"));
            }
        }

        Ok(())
    }

    /// Get the database path, using default if not set
    pub fn get_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dlqueue")
                .join("dlqueue.db")
        })
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub(crate) fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub(crate) fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    pub(crate) fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.retry_delay_ms, 100);
        assert_eq!(config.persist_debounce_ms, 2000);
        assert_eq!(config.progress_interval_ms, 200);
        assert_eq!(config.snapshot_key, "download_queue_state");
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Sha1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new()
            .max_concurrent_downloads(2)
            .persist_debounce_ms(50)
            .bearer_token("abc")
            .checksum_algorithm(ChecksumAlgorithm::Sha256);

        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.persist_debounce(), Duration::from_millis(50));
        assert_eq!(
            config.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn test_zero_slots_rejected() {
        let config = QueueConfig::new().max_concurrent_downloads(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let mut config = QueueConfig::new();
        config.http.proxy_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let config = QueueConfig::new().database_path("/tmp/q.db");
        assert_eq!(config.get_database_path(), PathBuf::from("/tmp/q.db"));
    }

    #[test]
    fn test_config_deserializes_without_optional_fields() {
        let mut value = serde_json::to_value(QueueConfig::default()).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("checksum_algorithm");
        obj.remove("headers");
        let config: QueueConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Sha1);
        assert!(config.headers.is_empty());
    }
}
