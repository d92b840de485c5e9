//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! max_workers = 8
//! pipe_queue_capacity = 0
//! fusion_enabled = true
//! pipelining_enabled = true
//! progress_interval = 1000
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound of concurrently running submissions. Workflows may ask for fewer.
    pub max_workers: usize,
    /// Capacity of the channels between pipelined activities. With 0 a producer hands
    /// over every tuple directly and never runs ahead of its consumer.
    pub pipe_queue_capacity: usize,
    pub fusion_enabled: bool,
    pub pipelining_enabled: bool,
    /// Number of tuples between two progress updates.
    pub progress_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            pipe_queue_capacity: 0,
            fusion_enabled: true,
            pipelining_enabled: true,
            progress_interval: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_workers".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "progress_interval".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("max_workers = 2").unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.pipe_queue_capacity, 0);
        assert!(config.fusion_enabled);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_workers = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
