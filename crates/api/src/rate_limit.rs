//! Per-peer rate limiting (GCRA via tower_governor)
//!
//! Needs the server to run with
//! `into_make_service_with_connect_info::<SocketAddr>()` so the peer IP
//! can be extracted.

use governor::middleware::StateInformationMiddleware;
use router::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config with `X-RateLimit-*` headers enabled
pub type PeerGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Requests allowed back to back
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_second: 1,
            burst_size: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && (self.per_second == 0 || self.burst_size == 0) {
            return Err(ConfigError::Invalid(
                "rate_limit.per_second and rate_limit.burst_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Build the governor config, or `None` when limiting is disabled
pub fn create_governor_config(
    config: &RateLimitConfig,
) -> Result<Option<Arc<PeerGovernorConfig>>, ConfigError> {
    if !config.enabled {
        return Ok(None);
    }
    let governor = GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .ok_or_else(|| ConfigError::Invalid("invalid rate limit quota".into()))?;
    Ok(Some(Arc::new(governor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let config = RateLimitConfig::default();
        assert!(create_governor_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_enabled_builds_config() {
        let config = RateLimitConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(create_governor_config(&config).unwrap().is_some());
    }

    #[test]
    fn test_zero_quota_rejected() {
        let config = RateLimitConfig {
            enabled: true,
            per_second: 0,
            burst_size: 5,
        };
        assert!(config.validate().is_err());
    }
}
