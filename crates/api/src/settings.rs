//! Service configuration

use crate::rate_limit::RateLimitConfig;
use router::{load_layered, ConfigError, CoreConfig, ENV_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// One JSON object per line
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub core: CoreConfig,
}

impl ServiceConfig {
    /// Defaults, then `path`, then `TGUARD__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = load_layered(path, ENV_PREFIX)?;
        config.core.validate()?;
        config.rate_limit.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.http.bind, "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.core.consumer_name, "telemetry-guard");
    }

    #[test]
    fn test_nested_core_section_from_file() {
        let path = std::env::temp_dir().join(format!("tguard-service-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[http]\nbind = \"127.0.0.1:9000\"\n\n[core]\nconsumer_name = \"capacity-monitoring\"\n\n[core.alerting]\ncooldown_seconds = 60\n",
        )
        .unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.http.bind, "127.0.0.1:9000");
        assert_eq!(config.core.consumer_name, "capacity-monitoring");
        assert_eq!(config.core.alerting.cooldown_seconds, 60);
        assert_eq!(config.core.alerting.max_alerts_per_hour, 50);
    }
}
