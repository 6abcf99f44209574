//! Core configuration
//!
//! Layered loading: struct defaults, then an optional file (TOML, YAML or
//! JSON by extension), then `TGUARD__SECTION__KEY` environment variables.

use alerting::AlertConfig;
use dead_letter::{MqttSinkConfig, DEFAULT_DLQ_SUFFIX};
use dedup_guard::DedupConfig;
use resilience::ResilienceConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TGUARD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dead-letter destination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    /// Appended to the source topic to form the destination
    pub topic_suffix: String,
    /// Records kept in the in-memory store
    pub retention: usize,
    /// Also publish to an MQTT broker
    pub mqtt_enabled: bool,
    pub mqtt: MqttSinkConfig,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            topic_suffix: DEFAULT_DLQ_SUFFIX.to_string(),
            retention: 10_000,
            mqtt_enabled: false,
            mqtt: MqttSinkConfig::default(),
        }
    }
}

/// Everything the router needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Recorded on dead-letter records and audit entries
    pub consumer_name: String,
    pub dedup: DedupConfig,
    pub resilience: ResilienceConfig,
    pub alerting: AlertConfig,
    pub dead_letter: DeadLetterSettings,
    /// Capacity of each per-(subject, metric) window
    pub buffer_capacity: usize,
    /// Period of the dedup sweep and idle alert decay
    pub maintenance_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            consumer_name: "telemetry-guard".to_string(),
            dedup: DedupConfig::default(),
            resilience: ResilienceConfig::default(),
            alerting: AlertConfig::default(),
            dead_letter: DeadLetterSettings::default(),
            buffer_capacity: metric_buffer::DEFAULT_CAPACITY,
            maintenance_interval_secs: 60,
        }
    }
}

impl CoreConfig {
    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = load_layered(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be > 0".into()));
        }
        if self.dedup.ttl_secs == 0 {
            return Err(ConfigError::Invalid("dedup.ttl_secs must be > 0".into()));
        }
        if self.dedup.ttl_secs > dedup_guard::MAX_TTL.as_secs() {
            return Err(ConfigError::Invalid(format!(
                "dedup.ttl_secs must be <= {}",
                dedup_guard::MAX_TTL.as_secs()
            )));
        }
        if self.resilience.handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid("resilience.handler_timeout_ms must be > 0".into()));
        }
        self.resilience
            .circuit_breaker
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.alerting
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.alerting.idle_ttl_seconds)
    }
}

/// Deserialize `T` from defaults, an optional file and `<PREFIX>__*` env vars
pub fn load_layered<T>(path: Option<&Path>, env_prefix: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let mut builder = ::config::Config::builder();
    if let Some(path) = path {
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(::config::File::from(path).required(true));
    }
    builder = builder.add_source(
        ::config::Environment::with_prefix(env_prefix)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder.build()?.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dedup.ttl_secs, 86_400);
        assert_eq!(config.resilience.handler_timeout_ms, 30_000);
        assert_eq!(config.dead_letter.topic_suffix, "-dlq");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("tguard-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "consumer_name = \"capacity-consumer\"\n\
             buffer_capacity = 120\n\
             [dedup]\nttl_secs = 600\n\
             [resilience.circuit_breaker]\nfailure_rate_threshold = 25.0\n"
        )
        .unwrap();
        drop(file);

        let config = CoreConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.consumer_name, "capacity-consumer");
        assert_eq!(config.buffer_capacity, 120);
        assert_eq!(config.dedup.ttl_secs, 600);
        assert_eq!(config.dedup.sweep_watermark, 1000);
        assert_eq!(config.resilience.circuit_breaker.failure_rate_threshold, 25.0);
        assert_eq!(config.resilience.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = CoreConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_dedup_ttl_rejected() {
        let mut config = CoreConfig::default();
        config.dedup.ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unreachable_minimum_calls_rejected() {
        let mut config = CoreConfig::default();
        config.resilience.circuit_breaker = config.resilience.circuit_breaker.with_window(4, 10);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.resilience.circuit_breaker.sliding_window_size = 0;
        config.resilience.circuit_breaker.minimum_calls = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
