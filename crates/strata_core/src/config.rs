//! # Store Configuration
//!
//! Capacities of every pre-sized structure in a [`crate::World`].
//! Loadable from TOML; every key is optional.
//!
//! ```toml
//! chunk_capacity = 256
//! max_chunks_per_archetype = 1024
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Slots per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_CAPACITY: usize = 128;

/// World capacities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Slots per chunk. Power of two.
    pub chunk_capacity: usize,
    /// Chunks one archetype may own.
    pub max_chunks_per_archetype: usize,
    /// Live queries per world.
    pub max_queries: usize,
    /// Deferred commands per frame.
    pub command_capacity: usize,
    /// Smallest external buffer, in bytes.
    pub external_min_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            max_chunks_per_archetype: 4096,
            max_queries: 256,
            command_capacity: 4096,
            external_min_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Default config with a different chunk capacity.
    #[must_use]
    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            chunk_capacity,
            ..Self::default()
        }
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chunk_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "chunk_capacity",
                reason: format!("{} is not a power of two", self.chunk_capacity),
            });
        }
        if self.chunk_capacity > u32::MAX as usize {
            return Err(ConfigError::Invalid {
                field: "chunk_capacity",
                reason: "exceeds u32::MAX".into(),
            });
        }
        let non_zero = [
            ("max_chunks_per_archetype", self.max_chunks_per_archetype),
            ("max_queries", self.max_queries),
            ("command_capacity", self.command_capacity),
            ("external_min_capacity", self.external_min_capacity),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] on bad values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_capacity, DEFAULT_CHUNK_CAPACITY);
    }

    #[test]
    fn test_partial_toml() {
        let config = StoreConfig::from_toml_str("chunk_capacity = 4\nmax_queries = 8\n").unwrap();
        assert_eq!(config.chunk_capacity, 4);
        assert_eq!(config.max_queries, 8);
        assert_eq!(config.command_capacity, 4096);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            StoreConfig::from_toml_str("chunk_capacity = 6"),
            Err(ConfigError::Invalid { field: "chunk_capacity", .. })
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("max_queries = 0"),
            Err(ConfigError::Invalid { field: "max_queries", .. })
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("chunk_size = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_and_missing_file() {
        let config = StoreConfig::with_chunk_capacity(32);
        let text = config.to_toml_string().unwrap();
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), config);

        assert!(matches!(
            StoreConfig::from_toml_file("/nonexistent/strata.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
