//! Configuration Module
//!
//! Settings applied when a cache is built.

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Upper bound on the capacity preallocated at construction.
pub const MAX_INITIAL_CAPACITY: usize = 1 << 20;

/// Cache configuration parameters.
///
/// Every field has a default, so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name attached to log events emitted by the cache
    pub name: String,
    /// Number of entries to preallocate room for
    pub initial_capacity: usize,
}

impl Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Example
    /// ```
    /// let config = ttlcache::Config::from_json(r#"{"name": "sessions"}"#).unwrap();
    /// assert_eq!(config.name, "sessions");
    /// assert_eq!(config.initial_capacity, 0);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can be used to build a cache.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        if self.initial_capacity > MAX_INITIAL_CAPACITY {
            return Err(CacheError::InvalidConfig(format!(
                "initial_capacity exceeds maximum of {}",
                MAX_INITIAL_CAPACITY
            )));
        }
        Ok(())
    }

    /// Brings the configuration within the limits `validate` checks.
    ///
    /// A blank name falls back to the default name and the capacity is
    /// clamped to [`MAX_INITIAL_CAPACITY`]. Used by the builder, whose setters
    /// take values directly.
    pub fn normalized(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = Config::default().name;
        }
        self.initial_capacity = self.initial_capacity.min(MAX_INITIAL_CAPACITY);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "ttlcache".to_string(),
            initial_capacity: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.name, "ttlcache");
        assert_eq!(config.initial_capacity, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let config = Config::from_json(r#"{"name":"sessions","initial_capacity":128}"#).unwrap();
        assert_eq!(config.name, "sessions");
        assert_eq!(config.initial_capacity, 128);
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_rejects_malformed_json() {
        let result = Config::from_json(r#"{"initial_capacity":"lots"}"#);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_empty_name() {
        let result = Config::from_json(r#"{"name":"  "}"#);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_normalized_satisfies_validate() {
        let config = Config {
            name: " ".to_string(),
            initial_capacity: usize::MAX,
        }
        .normalized();

        assert_eq!(config.name, "ttlcache");
        assert_eq!(config.initial_capacity, MAX_INITIAL_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_normalized_keeps_valid_values() {
        let config = Config {
            name: "sessions".to_string(),
            initial_capacity: 64,
        };
        assert_eq!(config.clone().normalized(), config);
    }

    #[test]
    fn test_config_rejects_huge_capacity() {
        let config = Config {
            initial_capacity: MAX_INITIAL_CAPACITY + 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }
}
