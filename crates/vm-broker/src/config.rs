//! Broker configuration
//!
//! Configuration is read from YAML. Every field is optional; missing fields
//! take their defaults. Durations are expressed in seconds.
//!
//! ```yaml
//! action_queue_capacity: 64
//! result_buffer: 1
//! transaction_ttl: 3600
//! sweep_interval: 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Tunables of the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Capacity of the dispatcher's inbound action queue
    pub action_queue_capacity: usize,

    /// Capacity of each transaction's result channel
    ///
    /// With the default of 1 an operation runner can stay at most one value
    /// ahead of the caller reading its results.
    pub result_buffer: usize,

    /// Age after which an unconsumed transaction is cancelled and discarded
    ///
    /// `None` keeps abandoned transactions until shutdown.
    #[serde(with = "optional_seconds")]
    pub transaction_ttl: Option<Duration>,

    /// How often the dispatcher looks for expired transactions
    #[serde(with = "seconds")]
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            action_queue_capacity: 64,
            result_buffer: 1,
            transaction_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl BrokerConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "action_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.result_buffer == 0 {
            return Err(ConfigError::Validation(
                "result_buffer must be at least 1".to_string(),
            ));
        }
        if self.transaction_ttl.is_some() && self.sweep_interval.is_zero() {
            return Err(ConfigError::Validation(
                "sweep_interval must be non-zero when transaction_ttl is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the abandoned-transaction TTL
    pub fn with_transaction_ttl(mut self, ttl: Duration) -> Self {
        self.transaction_ttl = Some(ttl);
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
