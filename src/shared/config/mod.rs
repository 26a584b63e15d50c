//! Backplane configuration module
//!
//! Provides configuration types for a backplane node. Values normally come
//! from the host process (see `backend::server::config::load_config`), but
//! can also be built directly or parsed from a `[backplane]` TOML table.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default channel prefix shared by every server in a deployment
pub const DEFAULT_CHANNEL_PREFIX: &str = "xfbackplane";

/// How long a group command waits for its ack
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// How often pending acks are swept for expiry
pub const DEFAULT_ACK_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// How long a client-result invocation waits for its completion
pub const DEFAULT_CLIENT_RESULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sub-protocol enabled when none is configured
pub const DEFAULT_PROTOCOL: &str = "json";

/// Backplane configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneConfig {
    /// Prefix of every channel name; must match across the deployment
    pub channel_prefix: String,
    /// This process's identity, used for its ack and return-result channels
    pub server_name: String,
    pub ack_timeout: Duration,
    pub ack_sweep_interval: Duration,
    pub client_result_timeout: Duration,
    /// Sub-protocols to serialize invocations for, in priority order
    pub protocols: Vec<String>,
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            server_name: generate_server_name(DEFAULT_CHANNEL_PREFIX),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            ack_sweep_interval: DEFAULT_ACK_SWEEP_INTERVAL,
            client_result_timeout: DEFAULT_CLIENT_RESULT_TIMEOUT,
            protocols: vec![DEFAULT_PROTOCOL.to_string()],
        }
    }
}

impl BackplaneConfig {
    /// Create a new BackplaneConfigBuilder
    pub fn builder() -> BackplaneConfigBuilder {
        BackplaneConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_prefix.is_empty() {
            return Err(ConfigError::MissingValue("channel_prefix"));
        }
        if self.server_name.is_empty() {
            return Err(ConfigError::MissingValue("server_name"));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("ack_timeout"));
        }
        if self.ack_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("ack_sweep_interval"));
        }
        if self.client_result_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("client_result_timeout"));
        }
        if self.ack_sweep_interval > self.ack_timeout {
            return Err(ConfigError::SweepLongerThanTimeout);
        }
        Ok(())
    }

    /// Parse the `[backplane]` table of a TOML document
    ///
    /// Missing keys fall back to their defaults; durations are whole seconds.
    ///
    /// ```rust
    /// use xfbackplane::shared::config::BackplaneConfig;
    ///
    /// let config = BackplaneConfig::from_toml_str(r#"
    ///     [backplane]
    ///     channel_prefix = "chat"
    ///     server_name = "node-a"
    ///     ack_timeout_secs = 10
    /// "#).unwrap();
    /// assert_eq!(config.channel_prefix, "chat");
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let raw = file.backplane.unwrap_or_default();

        let mut builder = Self::builder();
        if let Some(prefix) = raw.channel_prefix {
            builder = builder.channel_prefix(prefix);
        }
        if let Some(name) = raw.server_name {
            builder = builder.server_name(name);
        }
        if let Some(secs) = raw.ack_timeout_secs {
            builder = builder.ack_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = raw.ack_sweep_secs {
            builder = builder.ack_sweep_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = raw.client_result_timeout_secs {
            builder = builder.client_result_timeout(Duration::from_secs(secs));
        }
        if let Some(protocols) = raw.protocols {
            builder = builder.protocols(protocols);
        }
        builder.build()
    }
}

/// Build a unique server name from a prefix and a random suffix
pub fn generate_server_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Builder for BackplaneConfig
#[derive(Debug, Default)]
pub struct BackplaneConfigBuilder {
    channel_prefix: Option<String>,
    server_name: Option<String>,
    ack_timeout: Option<Duration>,
    ack_sweep_interval: Option<Duration>,
    client_result_timeout: Option<Duration>,
    protocols: Option<Vec<String>>,
}

impl BackplaneConfigBuilder {
    /// Set the channel prefix
    pub fn channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// Set the server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    pub fn ack_sweep_interval(mut self, interval: Duration) -> Self {
        self.ack_sweep_interval = Some(interval);
        self
    }

    pub fn client_result_timeout(mut self, timeout: Duration) -> Self {
        self.client_result_timeout = Some(timeout);
        self
    }

    /// Set the enabled sub-protocols
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<BackplaneConfig, ConfigError> {
        let channel_prefix = self
            .channel_prefix
            .unwrap_or_else(|| DEFAULT_CHANNEL_PREFIX.to_string());
        let server_name = self
            .server_name
            .unwrap_or_else(|| generate_server_name(&channel_prefix));
        let config = BackplaneConfig {
            channel_prefix,
            server_name,
            ack_timeout: self.ack_timeout.unwrap_or(DEFAULT_ACK_TIMEOUT),
            ack_sweep_interval: self.ack_sweep_interval.unwrap_or(DEFAULT_ACK_SWEEP_INTERVAL),
            client_result_timeout: self
                .client_result_timeout
                .unwrap_or(DEFAULT_CLIENT_RESULT_TIMEOUT),
            protocols: self
                .protocols
                .unwrap_or_else(|| vec![DEFAULT_PROTOCOL.to_string()]),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    backplane: Option<RawConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    channel_prefix: Option<String>,
    server_name: Option<String>,
    ack_timeout_secs: Option<u64>,
    ack_sweep_secs: Option<u64>,
    client_result_timeout_secs: Option<u64>,
    protocols: Option<Vec<String>>,
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("duration must be greater than zero: {0}")]
    InvalidDuration(&'static str),
    #[error("ack sweep interval must not exceed the ack timeout")]
    SweepLongerThanTimeout,
    #[error("invalid configuration file: {0}")]
    Parse(String),
}
