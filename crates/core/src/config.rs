//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Deployment settings consulted while deriving pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Standalone deployments mirror an upstream system instead of being the
    /// origin of record. Derived pools are then always unmapped-guest pools.
    pub standalone: bool,
}

impl EngineConfig {
    pub const STANDALONE_ENV: &'static str = "STANDALONE";

    /// Hosted mode.
    pub fn hosted() -> Self {
        Self { standalone: false }
    }

    pub fn with_standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    /// Read the deployment mode from `STANDALONE` (`true`/`false`).
    ///
    /// Missing or unparsable values fall back to hosted mode.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(Self::STANDALONE_ENV).ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        let standalone = match value {
            None => false,
            Some(raw) => raw.trim().to_ascii_lowercase().parse::<bool>().unwrap_or_else(|_| {
                tracing::warn!(
                    value = raw,
                    "invalid {} value, assuming hosted mode",
                    Self::STANDALONE_ENV
                );
                false
            }),
        };
        Self { standalone }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_hosted() {
        assert_eq!(EngineConfig::default(), EngineConfig::hosted());
        assert!(!EngineConfig::from_value(None).standalone);
    }

    #[test]
    fn parses_standalone_flag() {
        assert!(EngineConfig::from_value(Some("true")).standalone);
        assert!(EngineConfig::from_value(Some(" TRUE ")).standalone);
        assert!(!EngineConfig::from_value(Some("false")).standalone);
    }

    #[test]
    fn garbage_falls_back_to_hosted() {
        assert!(!EngineConfig::from_value(Some("sometimes")).standalone);
    }
}
