//! Lookup configuration.
//!
//! The core needs only a little ambient context to project a record: the
//! partition and region used to compose ARNs, and the tag keys the caller
//! wants hidden from the resolved state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tag keys and key prefixes to drop from projected tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnoreTagsConfig {
    /// Exact keys to drop.
    #[serde(default)]
    pub keys: BTreeSet<String>,
    /// Key prefixes to drop.
    #[serde(default)]
    pub key_prefixes: BTreeSet<String>,
}

impl IgnoreTagsConfig {
    /// Returns true if the key is ignored by this configuration.
    #[must_use]
    pub fn ignores(&self, key: &str) -> bool {
        self.keys.contains(key) || self.key_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}

/// Configuration shared by every resolution an engine performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupConfig {
    partition: String,
    region: String,
    ignore_tags: IgnoreTagsConfig,
}

impl LookupConfig {
    /// Creates a configuration for a region, deriving its partition.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` if the region is empty.
    pub fn new(region: impl Into<String>) -> Result<Self, ConfigError> {
        let region = region.into();
        if region.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "region".to_string(),
            });
        }
        Ok(Self {
            partition: partition_for_region(&region).to_string(),
            region,
            ignore_tags: IgnoreTagsConfig::default(),
        })
    }

    /// Loads a configuration from JSON.
    ///
    /// ```
    /// use imagelookup::LookupConfig;
    ///
    /// let config = LookupConfig::from_json(r#"{
    ///     "region": "cn-north-1",
    ///     "ignore_tags": {"key_prefixes": ["kubernetes.io/"]}
    /// }"#).unwrap();
    /// assert_eq!(config.partition(), "aws-cn");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDocument` for malformed JSON and
    /// `ConfigError::MissingField` for an empty region or partition.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            region: String,
            #[serde(default)]
            partition: Option<String>,
            #[serde(default)]
            ignore_tags: IgnoreTagsConfig,
        }

        let raw: Raw = serde_json::from_str(json).map_err(|e| ConfigError::InvalidDocument {
            reason: e.to_string(),
        })?;
        let mut config = Self::new(raw.region)?.with_ignore_tags(raw.ignore_tags);
        if let Some(partition) = raw.partition {
            config = config.with_partition(partition)?;
        }
        Ok(config)
    }

    /// Overrides the derived partition.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` if the partition is empty.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Result<Self, ConfigError> {
        let partition = partition.into();
        if partition.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "partition".to_string(),
            });
        }
        self.partition = partition;
        Ok(self)
    }

    /// Sets the tag ignore rules.
    #[must_use]
    pub fn with_ignore_tags(mut self, ignore_tags: IgnoreTagsConfig) -> Self {
        self.ignore_tags = ignore_tags;
        self
    }

    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub const fn ignore_tags(&self) -> &IgnoreTagsConfig {
        &self.ignore_tags
    }
}

/// Maps a region name onto its partition.
#[must_use]
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else {
        "aws"
    }
}
