//! Indexed bucket configuration.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Suffix appended to the primary bucket name to form the metadata bucket name.
pub const META_BUCKET_SUFFIX: &str = "_meta";

/// Configuration of a single indexed bucket.
///
/// `name` names the primary bucket; every entry of `indices` names both an
/// active index and the bucket backing it. The metadata bucket is derived
/// from `name` (see [`IndexedBucketConfig::meta_bucket_name`]).
///
/// # Validation Rules
///
/// - `name` must be non-empty
/// - index names must be non-empty and unique
/// - no index may share its name with the primary or metadata bucket
///
/// # Example
///
/// ```no_run
/// # use cairn_types::config::IndexedBucketConfig;
/// let config = IndexedBucketConfig::builder()
///     .name("tasks")
///     .indices(vec!["by_status".to_string()])
///     .build()
///     .expect("valid bucket config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexedBucketConfig {
    /// Primary bucket name.
    pub name: String,
    /// Active index names. Order is not significant.
    #[serde(default)]
    pub indices: Vec<String>,
}

#[bon::bon]
impl IndexedBucketConfig {
    /// Creates a new bucket configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any rule listed on
    /// [`IndexedBucketConfig`] is violated.
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(default)] indices: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self { name, indices };
        config.validate()?;
        Ok(config)
    }
}

impl IndexedBucketConfig {
    /// Name of the bucket holding the index metadata descriptor.
    #[must_use]
    pub fn meta_bucket_name(&self) -> String {
        format!("{}{META_BUCKET_SUFFIX}", self.name)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation {
                message: "bucket name must not be empty".to_string(),
            });
        }

        let meta = self.meta_bucket_name();
        let mut seen = HashSet::with_capacity(self.indices.len());
        for index in &self.indices {
            if index.is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("index names of bucket {} must not be empty", self.name),
                });
            }
            if *index == self.name || *index == meta {
                return Err(ConfigError::Validation {
                    message: format!("index {index} collides with a bucket of the same name"),
                });
            }
            if !seen.insert(index.as_str()) {
                return Err(ConfigError::Validation {
                    message: format!("duplicate index name: {index}"),
                });
            }
        }
        Ok(())
    }
}
