//! Candidate records returned by a fetcher.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ConfigError;
use crate::value::Value;

/// Names the identity attributes of a record type.
///
/// Every data source declares which attribute is its primary key, which is
/// the display name matched by `name_regex`, which carries the creation
/// timestamp used for most-recent selection, and which names the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordKeys {
    /// Primary key attribute.
    pub id: &'static str,
    /// Display name attribute.
    pub name: &'static str,
    /// Creation timestamp attribute (RFC 3339).
    pub created: &'static str,
    /// Owner attribute.
    pub owner: &'static str,
}

/// A record returned by the remote API, before any filtering.
///
/// Records are immutable once built; the core only reads them.
///
/// # Examples
///
/// ```
/// use imagelookup::{CandidateRecord, image::IMAGE_KEYS};
///
/// let record = CandidateRecord::new(IMAGE_KEYS)
///     .with("image_id", "ami-0a1b")
///     .with("name", "web-2024-01-01")
///     .with("creation_date", "2024-01-01T00:00:00Z");
///
/// assert_eq!(record.id(), "ami-0a1b");
/// assert_eq!(record.name(), Some("web-2024-01-01"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    #[serde(skip)]
    keys: RecordKeys,
    attributes: BTreeMap<String, Value>,
}

impl CandidateRecord {
    /// Creates an empty record of the given type.
    #[must_use]
    pub const fn new(keys: RecordKeys) -> Self {
        Self {
            keys,
            attributes: BTreeMap::new(),
        }
    }

    /// Builds a record from an already-decoded attribute map.
    #[must_use]
    pub const fn from_attributes(keys: RecordKeys, attributes: BTreeMap<String, Value>) -> Self {
        Self { keys, attributes }
    }

    /// Builds a record from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDocument` if the value is not an object.
    pub fn from_json(keys: RecordKeys, json: serde_json::Value) -> Result<Self, ConfigError> {
        match serde_json::from_value::<Value>(json) {
            Ok(Value::Map(attributes)) => Ok(Self::from_attributes(keys, attributes)),
            Ok(other) => Err(ConfigError::InvalidDocument {
                reason: format!("record must be an object, got {}", other.type_name()),
            }),
            Err(e) => Err(ConfigError::InvalidDocument {
                reason: e.to_string(),
            }),
        }
    }

    /// Sets an attribute, returning the record.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The identity descriptor of this record.
    #[must_use]
    pub const fn keys(&self) -> &RecordKeys {
        &self.keys
    }

    /// All raw attributes.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// A raw attribute, treating explicit nulls as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// A string attribute.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// The primary key, or `""` when the API omitted it.
    #[must_use]
    pub fn id(&self) -> &str {
        self.get_str(self.keys.id).unwrap_or_default()
    }

    /// The display name, if the API returned one. May be empty.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str(self.keys.name)
    }

    /// The raw creation timestamp, unparsed.
    #[must_use]
    pub fn created(&self) -> Option<&str> {
        self.get_str(self.keys.created)
    }

    /// The owner, if returned.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.get_str(self.keys.owner)
    }
}
