//! Shape-driven flattening of a raw record into output attributes.
//!
//! An `OutputShape` declares, per data source, which raw attributes are
//! copied as scalars, which nested lists are unordered collections (and the
//! canonical policy that hashes their elements), which values are derived by
//! looking across two structures, and which optional substructures are
//! normalized to fixed-key maps. Flattening is total: malformed or missing
//! input degrades to absence, never to an error.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::canonical::{CanonicalPolicy, CanonicalSet, ElementAttributes, ElementValue};
use crate::record::CandidateRecord;
use crate::value::Value;

/// Sentinel written into reason maps when the API omitted the reason.
pub const UNSET: &str = "UNSET";

/// How a scalar is typed in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Int,
}

impl FieldKind {
    /// Textual zero value, used for element fields the API omitted.
    #[must_use]
    pub const fn zero_text(self) -> &'static str {
        match self {
            Self::Text => "",
            Self::Bool => "false",
            Self::Int => "0",
        }
    }
}

/// A scalar attribute copied from the raw record under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarField {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl ScalarField {
    #[must_use]
    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Text }
    }

    #[must_use]
    pub const fn bool(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Bool }
    }

    #[must_use]
    pub const fn int(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Int }
    }
}

/// An optional nested map inside a collection element, flattened to strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmapField {
    pub name: &'static str,
    pub fields: &'static [ScalarField],
}

/// The attributes kept for each element of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementShape {
    pub scalars: &'static [ScalarField],
    pub submaps: &'static [SubmapField],
}

/// A list of sub-records projected as an unordered canonical set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionField {
    /// Output attribute name.
    pub name: &'static str,
    /// Raw attribute holding the list.
    pub source: &'static str,
    pub element: ElementShape,
    pub policy: CanonicalPolicy,
}

/// A value found by matching a record field against a collection.
///
/// The first element of `collection` whose `match_field` equals the record's
/// `key_field` and that carries a string at `value_path` (dotted) supplies
/// the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedLookup {
    pub name: &'static str,
    pub key_field: &'static str,
    pub collection: &'static str,
    pub match_field: &'static str,
    pub value_path: &'static str,
}

/// An optional substructure normalized to a fixed-key string map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasonField {
    pub name: &'static str,
    pub source: &'static str,
    pub members: &'static [&'static str],
}

/// Everything a data source projects besides identity and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputShape {
    pub scalars: &'static [ScalarField],
    pub collections: &'static [CollectionField],
    pub related: &'static [RelatedLookup],
    pub reasons: &'static [ReasonField],
}

/// A flattened output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Map(BTreeMap<String, String>),
    Set(CanonicalSet),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_set(&self) -> Option<&CanonicalSet> {
        match self {
            Self::Set(v) => Some(v),
            _ => None,
        }
    }
}

/// Flattened attributes keyed by output name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FlatAttributes(BTreeMap<String, AttributeValue>);

impl FlatAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_text)
    }

    #[must_use]
    pub fn map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.get(name).and_then(AttributeValue::as_map)
    }

    #[must_use]
    pub fn set(&self, name: &str) -> Option<&CanonicalSet> {
        self.get(name).and_then(AttributeValue::as_set)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Flattens a record according to a shape.
#[must_use]
pub fn flatten(record: &CandidateRecord, shape: &OutputShape) -> FlatAttributes {
    let mut out = FlatAttributes::new();

    for field in shape.scalars {
        if let Some(value) = record.get(field.name).and_then(|v| flatten_scalar(v, field.kind)) {
            out.insert(field.name, value);
        }
    }

    for collection in shape.collections {
        let set = flatten_collection(record.get(collection.source), collection);
        out.insert(collection.name, AttributeValue::Set(set));
    }

    for lookup in shape.related {
        let value = find_related(record, lookup).unwrap_or_default();
        out.insert(lookup.name, AttributeValue::Text(value));
    }

    for reason in shape.reasons {
        let map = normalize_reason(record.get(reason.source), reason.members);
        out.insert(reason.name, AttributeValue::Map(map));
    }

    out
}

/// Copies a raw scalar into its output type.
///
/// Booleans and integers given as text are parsed; anything else that does
/// not fit the declared kind is dropped.
#[must_use]
pub fn flatten_scalar(value: &Value, kind: FieldKind) -> Option<AttributeValue> {
    match kind {
        FieldKind::Text => value.to_text().map(AttributeValue::Text),
        FieldKind::Bool => parse_bool(value).map(AttributeValue::Bool),
        FieldKind::Int => parse_int(value).map(AttributeValue::Int),
    }
}

/// A boolean, or its text in any ASCII case.
fn parse_bool(value: &Value) -> Option<bool> {
    value.as_bool().or_else(|| match value.as_str()?.trim() {
        s if s.eq_ignore_ascii_case("true") => Some(true),
        s if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    })
}

/// An integer, or its base-10 text.
fn parse_int(value: &Value) -> Option<i64> {
    value
        .as_int()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Flattens one list of sub-records into a canonical set.
#[must_use]
pub fn flatten_collection(raw: Option<&Value>, field: &CollectionField) -> CanonicalSet {
    let items = raw.and_then(Value::as_list).unwrap_or_default();
    let elements = items.iter().filter_map(|item| {
        if item.as_map().is_none() {
            debug!(collection = field.name, kind = item.type_name(), "skipping non-map element");
            return None;
        }
        let attrs = flatten_element(item, &field.element);
        debug!(collection = field.name, element = ?attrs, "adding element");
        Some(attrs)
    });
    field.policy.set(elements)
}

/// Flattens one sub-record.
///
/// Every declared scalar is materialized, taking its kind's zero value when
/// the API omitted it. A declared sub-map appears only if the API returned
/// it, with its members encoded as text the same way.
#[must_use]
pub fn flatten_element(raw: &Value, shape: &ElementShape) -> ElementAttributes {
    let mut attrs = ElementAttributes::new();
    for field in shape.scalars {
        attrs.insert(field.name.to_string(), ElementValue::Text(encode_field(raw.get(field.name), field.kind)));
    }
    for submap in shape.submaps {
        let Some(inner) = raw.get(submap.name).filter(|v| v.as_map().is_some()) else {
            continue;
        };
        let map: BTreeMap<String, String> = submap
            .fields
            .iter()
            .map(|f| (f.name.to_string(), encode_field(inner.get(f.name), f.kind)))
            .collect();
        attrs.insert(submap.name.to_string(), ElementValue::Map(map));
    }
    attrs
}

/// Text form of an element field. Typed fields go through the same parse as
/// top-level scalars; a value that does not parse keeps its raw text.
fn encode_field(value: Option<&Value>, kind: FieldKind) -> String {
    let Some(value) = value else {
        return kind.zero_text().to_string();
    };
    let typed = match kind {
        FieldKind::Text => None,
        FieldKind::Bool => parse_bool(value).map(|b| b.to_string()),
        FieldKind::Int => parse_int(value).map(|i| i.to_string()),
    };
    typed
        .or_else(|| value.to_text())
        .unwrap_or_else(|| kind.zero_text().to_string())
}

/// Finds a value for `lookup` by linear scan. `None` is a valid outcome.
#[must_use]
pub fn find_related(record: &CandidateRecord, lookup: &RelatedLookup) -> Option<String> {
    let key = record.get_str(lookup.key_field)?;
    let items = record.get(lookup.collection).and_then(Value::as_list)?;
    items
        .iter()
        .filter(|item| item.get(lookup.match_field).and_then(Value::as_str) == Some(key))
        .find_map(|item| value_at(item, lookup.value_path).and_then(Value::as_str))
        .map(str::to_string)
}

fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |v, segment| v.get(segment))
        .filter(|v| !v.is_null())
}

/// Normalizes an optional reason substructure to a fixed-key map.
///
/// When the API omitted it entirely every member is `UNSET`; when present,
/// members it lacks are `""`.
#[must_use]
pub fn normalize_reason(raw: Option<&Value>, members: &[&str]) -> BTreeMap<String, String> {
    match raw.filter(|v| v.as_map().is_some()) {
        Some(reason) => members
            .iter()
            .map(|m| (m.to_string(), reason.get(m).and_then(Value::to_text).unwrap_or_default()))
            .collect(),
        None => members.iter().map(|m| (m.to_string(), UNSET.to_string())).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKeys;
    use serde_json::json;

    const KEYS: RecordKeys = RecordKeys {
        id: "id",
        name: "name",
        created: "created",
        owner: "owner",
    };

    const DISK: ElementShape = ElementShape {
        scalars: &[ScalarField::text("device")],
        submaps: &[SubmapField {
            name: "volume",
            fields: &[
                ScalarField::bool("encrypted"),
                ScalarField::text("snapshot"),
                ScalarField::int("size"),
            ],
        }],
    };

    const DISKS: CollectionField = CollectionField {
        name: "disks",
        source: "disks",
        element: DISK,
        policy: CanonicalPolicy::new(
            "disks",
            &["device", "volume.encrypted", "volume.size", "volume.snapshot"],
        ),
    };

    const SHAPE: OutputShape = OutputShape {
        scalars: &[
            ScalarField::text("kind"),
            ScalarField::text("description"),
            ScalarField::bool("public"),
            ScalarField::int("size"),
        ],
        collections: &[DISKS],
        related: &[RelatedLookup {
            name: "root_snapshot",
            key_field: "root",
            collection: "disks",
            match_field: "device",
            value_path: "volume.snapshot",
        }],
        reasons: &[ReasonField {
            name: "reason",
            source: "reason",
            members: &["code", "message"],
        }],
    };

    fn record(json: serde_json::Value) -> CandidateRecord {
        CandidateRecord::from_json(KEYS, json).unwrap()
    }

    #[test]
    fn test_scalars_copied_and_absent_omitted() {
        let flat = flatten(
            &record(json!({"kind": "machine", "public": true, "size": "12", "description": null})),
            &SHAPE,
        );
        assert_eq!(flat.text("kind"), Some("machine"));
        assert_eq!(flat.get("public").and_then(AttributeValue::as_bool), Some(true));
        assert_eq!(flat.get("size").and_then(AttributeValue::as_int), Some(12));
        assert!(!flat.contains("description"));
    }

    #[test]
    fn test_known_empty_is_kept() {
        let flat = flatten(&record(json!({"description": ""})), &SHAPE);
        assert_eq!(flat.text("description"), Some(""));
    }

    #[test]
    fn test_mismatched_scalar_dropped() {
        assert_eq!(flatten_scalar(&Value::from("yes"), FieldKind::Bool), None);
        assert_eq!(flatten_scalar(&Value::List(vec![]), FieldKind::Text), None);
    }

    #[test]
    fn test_element_encodings() {
        let raw: Value = serde_json::from_value(json!({
            "device": "/dev/sda1",
            "volume": {"encrypted": false, "size": 8}
        }))
        .unwrap();
        let attrs = flatten_element(&raw, &DISK);
        let volume = attrs["volume"].as_map().unwrap();
        assert_eq!(volume["encrypted"], "false");
        assert_eq!(volume["size"], "8");
        assert_eq!(volume["snapshot"], "");
    }

    #[test]
    fn test_element_typed_fields_match_scalar_encoding() {
        let raw: Value = serde_json::from_value(json!({
            "device": "/dev/sda1",
            "volume": {"encrypted": "True", "size": " 8"}
        }))
        .unwrap();
        let attrs = flatten_element(&raw, &DISK);
        let volume = attrs["volume"].as_map().unwrap();
        assert_eq!(volume["encrypted"], "true");
        assert_eq!(volume["size"], "8");

        let typed: Value = serde_json::from_value(json!({
            "device": "/dev/sda1",
            "volume": {"encrypted": true, "size": 8}
        }))
        .unwrap();
        assert_eq!(
            DISKS.policy.digest(&attrs),
            DISKS.policy.digest(&flatten_element(&typed, &DISK))
        );
        assert_eq!(
            flatten_scalar(&Value::from("True"), FieldKind::Bool),
            Some(AttributeValue::Bool(true))
        );
    }

    #[test]
    fn test_element_without_submap() {
        let raw: Value = serde_json::from_value(json!({"volume": null})).unwrap();
        let attrs = flatten_element(&raw, &DISK);
        assert_eq!(attrs["device"].as_text(), Some(""));
        assert!(!attrs.contains_key("volume"));
    }

    #[test]
    fn test_collection_skips_non_maps() {
        let flat = flatten(
            &record(json!({"disks": [{"device": "a"}, "junk", null, {"device": "b"}]})),
            &SHAPE,
        );
        assert_eq!(flat.set("disks").map(CanonicalSet::len), Some(2));
    }

    #[test]
    fn test_collection_absent_is_empty_set() {
        let flat = flatten(&record(json!({})), &SHAPE);
        assert!(flat.set("disks").is_some_and(CanonicalSet::is_empty));
    }

    #[test]
    fn test_related_lookup() {
        let r = record(json!({
            "root": "/dev/xvda",
            "disks": [
                {"device": "/dev/xvda"},
                {"device": "/dev/xvdb", "volume": {"snapshot": "snap-b"}},
                {"device": "/dev/xvda", "volume": {"snapshot": "snap-a"}}
            ]
        }));
        assert_eq!(find_related(&r, &SHAPE.related[0]).as_deref(), Some("snap-a"));
    }

    #[test]
    fn test_related_lookup_absent() {
        let no_root = record(json!({"disks": [{"device": "/dev/xvda", "volume": {"snapshot": "s"}}]}));
        assert_eq!(find_related(&no_root, &SHAPE.related[0]), None);

        let no_match = record(json!({
            "root": "/dev/sda1",
            "disks": [{"device": "/dev/xvda", "volume": {"snapshot": "s"}}]
        }));
        assert_eq!(find_related(&no_match, &SHAPE.related[0]), None);
        assert_eq!(flatten(&no_match, &SHAPE).text("root_snapshot"), Some(""));
    }

    #[test]
    fn test_reason_normalization() {
        let absent = normalize_reason(None, &["code", "message"]);
        assert_eq!(absent["code"], UNSET);
        assert_eq!(absent["message"], UNSET);

        let raw: Value = serde_json::from_value(json!({"code": "Server.Error"})).unwrap();
        let present = normalize_reason(Some(&raw), &["code", "message"]);
        assert_eq!(present["code"], "Server.Error");
        assert_eq!(present["message"], "");
    }
}
