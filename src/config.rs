use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RestreamError;

/// Fallback server when neither a config file nor a flag names one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`StreamManager`](crate::manager::StreamManager).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the chat server (e.g. `http://127.0.0.1:8080`).
    pub base_url: String,
    /// No activity of any kind for this long declares the connection dead.
    pub stall_timeout: Duration,
    /// How often to probe `/heartbeat-probe` while a stream is active.
    pub heartbeat_interval: Duration,
    /// Pause before each reconnect attempt (a bounded jitter is added).
    pub reconnect_backoff: Duration,
    /// Reconnect attempts before the session fails terminally.
    pub max_reconnects: u32,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Upper bound on the one-shot recovery fetch.
    pub recovery_timeout: Duration,
}

impl StreamConfig {
    /// Create a config with sensible defaults.
    ///
    /// - stall_timeout: 30 s
    /// - heartbeat_interval: 10 s
    /// - reconnect_backoff: 2 s
    /// - max_reconnects: 3
    /// - connect_timeout: 3 s
    /// - recovery_timeout: 30 s
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            stall_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(2),
            max_reconnects: 3,
            connect_timeout: Duration::from_secs(3),
            recovery_timeout: Duration::from_secs(30),
        }
    }

    /// Start building a config aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> StreamConfigBuilder {
        StreamConfigBuilder { config: StreamConfig::new(base_url) }
    }

    /// Parse a TOML document and apply its values over the defaults.
    /// Absent keys keep their defaults.
    pub fn from_toml_str(doc: &str) -> Result<Self, RestreamError> {
        let file: ConfigFile =
            toml::from_str(doc).map_err(|e| RestreamError::Config(e.to_string()))?;
        let mut config = StreamConfig::new(
            file.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        );
        if let Some(ms) = file.stall_timeout_ms {
            config.stall_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.heartbeat_interval_ms {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.reconnect_backoff_ms {
            config.reconnect_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_reconnects {
            config.max_reconnects = n;
        }
        if let Some(ms) = file.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.recovery_timeout_ms {
            config.recovery_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RestreamError> {
        let doc = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RestreamError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&doc)
    }

    pub fn validate(&self) -> Result<(), RestreamError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RestreamError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.stall_timeout.is_zero() {
            return Err(RestreamError::Config("stall_timeout must be non-zero".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(RestreamError::Config("heartbeat_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Join an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// On-disk form. Durations are millisecond integers so files stay plain.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    stall_timeout_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    reconnect_backoff_ms: Option<u64>,
    max_reconnects: Option<u32>,
    connect_timeout_ms: Option<u64>,
    recovery_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`StreamConfig`].
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.config.stall_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.config.reconnect_backoff = backoff;
        self
    }

    pub fn max_reconnects(mut self, max: u32) -> Self {
        self.config.max_reconnects = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Consume the builder, validating the result.
    pub fn build(self) -> Result<StreamConfig, RestreamError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
