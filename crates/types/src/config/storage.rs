//! Storage engine configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum cache size: 1 MB.
const MIN_CACHE_SIZE_BYTES: usize = 1024 * 1024;

/// Storage engine configuration.
///
/// # Validation Rules
///
/// - `cache_size_bytes` must be >= 1 MB (1,048,576 bytes)
///
/// # Example
///
/// ```no_run
/// # use cairn_types::config::EngineConfig;
/// let config = EngineConfig::builder()
///     .cache_size_bytes(128 * 1024 * 1024)
///     .build()
///     .expect("valid engine config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Maximum size of the page cache in bytes.
    ///
    /// Must be >= 1 MB (1,048,576 bytes) for reasonable operation.
    #[serde(default = "default_cache_size")]
    pub cache_size_bytes: usize,
}

#[bon::bon]
impl EngineConfig {
    /// Creates a new engine configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `cache_size_bytes` < 1 MB.
    #[builder]
    pub fn new(
        #[builder(default = default_cache_size())] cache_size_bytes: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { cache_size_bytes };
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size_bytes < MIN_CACHE_SIZE_BYTES {
            return Err(ConfigError::Validation {
                message: format!(
                    "cache_size_bytes must be >= {} (1 MB), got {}",
                    MIN_CACHE_SIZE_BYTES, self.cache_size_bytes
                ),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { cache_size_bytes: default_cache_size() }
    }
}

fn default_cache_size() -> usize {
    64 * 1024 * 1024 // 64 MB
}
