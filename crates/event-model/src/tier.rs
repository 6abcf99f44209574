//! Criticality Tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Configuration class determining how aggressively an event type is
/// retried and escalated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticalityTier {
    /// Routine telemetry
    #[default]
    Standard,
    /// Business-impacting signals (cost, capacity, database health)
    Elevated,
    /// Payment, security and compliance events; silent loss is unacceptable
    Critical,
}

impl CriticalityTier {
    pub const ALL: [CriticalityTier; 3] = [Self::Standard, Self::Elevated, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CriticalityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CriticalityTier {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "elevated" => Ok(Self::Elevated),
            "critical" => Ok(Self::Critical),
            other => Err(ValidationError::InvalidFormat(format!(
                "unknown criticality tier: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tier() {
        assert_eq!("Critical".parse::<CriticalityTier>().unwrap(), CriticalityTier::Critical);
        assert_eq!(" elevated ".parse::<CriticalityTier>().unwrap(), CriticalityTier::Elevated);
        assert!("paging".parse::<CriticalityTier>().is_err());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(CriticalityTier::Critical > CriticalityTier::Elevated);
        assert!(CriticalityTier::Elevated > CriticalityTier::Standard);
        assert_eq!(CriticalityTier::default(), CriticalityTier::Standard);
    }
}
