//! Projection of the resolved record into its output state.

use std::fmt;

use serde::Serialize;

use crate::config::LookupConfig;
use crate::flatten::{flatten, AttributeValue, FlatAttributes, OutputShape};
use crate::record::{CandidateRecord, RecordKeys};
use crate::tags::KeyValueTags;

/// How a data source composes the ARN of its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArnSpec {
    pub service: &'static str,
    pub resource_type: &'static str,
}

impl ArnSpec {
    /// Composes the ARN of a record. Account is left empty, as for public
    /// catalogue resources.
    #[must_use]
    pub fn arn(&self, config: &LookupConfig, id: &str) -> Arn {
        Arn {
            partition: config.partition().to_string(),
            service: self.service.to_string(),
            region: config.region().to_string(),
            account_id: String::new(),
            resource: format!("{}/{id}", self.resource_type),
        }
    }
}

/// An Amazon Resource Name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// Everything needed to resolve and project one kind of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSource {
    /// Short name used in diagnostics.
    pub name: &'static str,
    pub keys: RecordKeys,
    pub shape: OutputShape,
    /// Derived `arn` attribute, if the source has one.
    pub arn: Option<ArnSpec>,
    /// Raw attribute holding tags, projected as `tags`.
    pub tags: Option<&'static str>,
}

/// The single record chosen by a resolution, projected into output
/// attributes. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedState {
    id: String,
    attributes: FlatAttributes,
}

impl ResolvedState {
    /// The record's identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn attributes(&self) -> &FlatAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.attributes.text(name)
    }

    /// Names of attributes whose values differ from `previous`, including
    /// attributes present on only one side. Sets compare by member digests.
    #[must_use]
    pub fn changed_attributes<'a>(&'a self, previous: &'a Self) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(name, value)| previous.get(name) != Some(*value))
            .map(|(name, _)| name)
            .collect();
        names.extend(
            previous
                .attributes
                .iter()
                .filter(|(name, _)| !self.attributes.contains(name))
                .map(|(name, _)| name),
        );
        names.sort_unstable();
        names
    }

    /// A blake3 digest over the identifier and every attribute.
    ///
    /// Equal states always fingerprint equal; sets contribute their members
    /// in digest order.
    #[must_use]
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        feed(&mut hasher, self.id.as_bytes());
        for (name, value) in self.attributes.iter() {
            feed(&mut hasher, name.as_bytes());
            match value {
                AttributeValue::Text(v) => {
                    hasher.update(&[0]);
                    feed(&mut hasher, v.as_bytes());
                }
                AttributeValue::Bool(v) => {
                    hasher.update(&[1, u8::from(*v)]);
                }
                AttributeValue::Int(v) => {
                    hasher.update(&[2]);
                    hasher.update(&v.to_le_bytes());
                }
                AttributeValue::Map(map) => {
                    hasher.update(&[3]);
                    hasher.update(&(map.len() as u64).to_le_bytes());
                    for (k, v) in map {
                        feed(&mut hasher, k.as_bytes());
                        feed(&mut hasher, v.as_bytes());
                    }
                }
                AttributeValue::Set(set) => {
                    hasher.update(&[4]);
                    hasher.update(&(set.len() as u64).to_le_bytes());
                    for element in set {
                        hasher.update(&element.digest().value().to_le_bytes());
                    }
                }
            }
        }
        hasher.finalize()
    }
}

/// Length-prefixed write, so adjacent fields cannot run together.
fn feed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Projects the resolved record into its output state.
///
/// Total: every input record yields a state.
#[must_use]
pub fn project(record: &CandidateRecord, source: &DataSource, config: &LookupConfig) -> ResolvedState {
    let id = record.id().to_string();
    let mut attributes = flatten(record, &source.shape);

    if let Some(spec) = source.arn {
        attributes.insert("arn", AttributeValue::Text(spec.arn(config, &id).to_string()));
    }

    if let Some(field) = source.tags {
        let tags = KeyValueTags::from_value(record.get(field))
            .ignore_reserved()
            .ignore_config(config.ignore_tags())
            .into_map();
        attributes.insert("tags", AttributeValue::Map(tags));
    }

    ResolvedState { id, attributes }
}
