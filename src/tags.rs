//! Key/value tags.
//!
//! The API returns tags as a list of `{key, value}` pairs. They are projected
//! as a plain string map after dropping provider-reserved (`aws:`) keys and
//! anything the caller configured to ignore.

use std::collections::BTreeMap;

use crate::config::IgnoreTagsConfig;
use crate::value::Value;

/// Prefix of provider-reserved tag keys.
pub const RESERVED_PREFIX: &str = "aws:";

/// An ordered set of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueTags(BTreeMap<String, String>);

impl KeyValueTags {
    /// Reads tags from a raw attribute.
    ///
    /// Accepts a list of `{key, value}` maps (either casing) or a plain map.
    /// Entries without a key are dropped; a missing value is `""`.
    #[must_use]
    pub fn from_value(raw: Option<&Value>) -> Self {
        let mut tags = BTreeMap::new();
        match raw {
            Some(Value::List(items)) => {
                for item in items {
                    let field = |a: &str, b: &str| {
                        item.get(a)
                            .or_else(|| item.get(b))
                            .and_then(Value::to_text)
                    };
                    if let Some(key) = field("key", "Key") {
                        tags.insert(key, field("value", "Value").unwrap_or_default());
                    }
                }
            }
            Some(Value::Map(map)) => {
                for (key, value) in map {
                    tags.insert(key.clone(), value.to_text().unwrap_or_default());
                }
            }
            _ => {}
        }
        Self(tags)
    }

    /// Drops provider-reserved keys.
    #[must_use]
    pub fn ignore_reserved(mut self) -> Self {
        self.0.retain(|k, _| !k.starts_with(RESERVED_PREFIX));
        self
    }

    /// Drops keys the configuration ignores.
    #[must_use]
    pub fn ignore_config(mut self, config: &IgnoreTagsConfig) -> Self {
        self.0.retain(|k, _| !config.ignores(k));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(json: serde_json::Value) -> Value {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_tags_from_list() {
        let v = raw(json!([
            {"key": "Name", "value": "web"},
            {"Key": "Team", "Value": "platform"},
            {"value": "orphan"},
            {"key": "Empty"}
        ]));
        let map = KeyValueTags::from_value(Some(&v)).into_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["Name"], "web");
        assert_eq!(map["Team"], "platform");
        assert_eq!(map["Empty"], "");
    }

    #[test]
    fn test_tags_from_map() {
        let v = raw(json!({"Name": "web", "Count": 3}));
        let map = KeyValueTags::from_value(Some(&v)).into_map();
        assert_eq!(map["Count"], "3");
    }

    #[test]
    fn test_tags_ignore_rules() {
        let v = raw(json!({
            "Name": "web",
            "aws:cloudformation:stack-name": "s",
            "Owner": "me",
            "ci:run": "42"
        }));
        let config = IgnoreTagsConfig {
            keys: ["Owner".to_string()].into(),
            key_prefixes: ["ci:".to_string()].into(),
        };
        let tags = KeyValueTags::from_value(Some(&v))
            .ignore_reserved()
            .ignore_config(&config);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.into_map()["Name"], "web");
    }

    #[test]
    fn test_tags_absent() {
        assert!(KeyValueTags::from_value(None).is_empty());
        assert!(KeyValueTags::from_value(Some(&Value::from("x"))).is_empty());
    }
}
