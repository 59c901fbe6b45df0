//! Canonical forms and digests for unordered collections.
//!
//! Each unordered output collection (block device mappings, product codes,
//! ...) has a `CanonicalPolicy` that enumerates exactly which key paths take
//! part in element equality, in a declared alphabetical order. An element's
//! canonical byte string is built from those keys alone, never from map
//! iteration order, and its digest is a CRC-32 of that string.
//!
//! Canonical byte layout, per declared key in order:
//!
//! ```text
//! escaped(value) 0x1F
//! ```
//!
//! A missing key contributes an empty segment (just the separator), so the
//! number of segments is fixed per policy. `\` and `0x1F` inside values are
//! escaped with `\`, so no value can forge a segment boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize, Serializer};

/// Segment separator in canonical byte strings.
pub const SEPARATOR: u8 = 0x1f;

/// Escape byte in canonical byte strings.
pub const ESCAPE: u8 = b'\\';

/// A flattened element attribute: either text or a string-valued sub-map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ElementValue {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl ElementValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            Self::Map(_) => None,
        }
    }

    pub const fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Map(v) => Some(v),
            Self::Text(_) => None,
        }
    }
}

impl From<&str> for ElementValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ElementValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<BTreeMap<String, String>> for ElementValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        Self::Map(v)
    }
}

/// Flattened attributes of one collection element.
pub type ElementAttributes = BTreeMap<String, ElementValue>;

/// Fixed-width digest of an element's canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(u32);

impl Digest {
    /// Digests a canonical byte string.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32fast::hash(bytes))
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Declares which key paths participate in element equality, and in which
/// order.
///
/// A key path is either a top-level key (`"device_name"`) or a member of a
/// sub-map (`"ebs.volume_type"`). Keys must be declared in strictly
/// ascending order; `is_canonical_order` checks this and every shipped
/// policy is tested against it.
///
/// # Examples
///
/// ```
/// use imagelookup::canonical::{CanonicalPolicy, ElementAttributes};
///
/// const CODES: CanonicalPolicy =
///     CanonicalPolicy::new("codes", &["product_code_id", "product_code_type"]);
///
/// let mut a = ElementAttributes::new();
/// a.insert("product_code_type".into(), "marketplace".into());
/// a.insert("product_code_id".into(), "abc".into());
///
/// let mut b = ElementAttributes::new();
/// b.insert("product_code_id".into(), "abc".into());
/// b.insert("product_code_type".into(), "marketplace".into());
///
/// assert_eq!(CODES.digest(&a), CODES.digest(&b));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalPolicy {
    name: &'static str,
    keys: &'static [&'static str],
}

impl CanonicalPolicy {
    /// Creates a policy over the given key paths.
    #[must_use]
    pub const fn new(name: &'static str, keys: &'static [&'static str]) -> Self {
        Self { name, keys }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn keys(&self) -> &'static [&'static str] {
        self.keys
    }

    /// Returns true if the declared keys are strictly ascending.
    #[must_use]
    pub fn is_canonical_order(&self) -> bool {
        self.keys.windows(2).all(|w| w[0] < w[1])
    }

    /// Builds the canonical byte string of an element.
    #[must_use]
    pub fn canonical_bytes(&self, attrs: &ElementAttributes) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.keys.len() * 16);
        for path in self.keys {
            if let Some(value) = lookup(attrs, path) {
                push_escaped(&mut buf, value);
            }
            buf.push(SEPARATOR);
        }
        buf
    }

    /// Digests an element.
    #[must_use]
    pub fn digest(&self, attrs: &ElementAttributes) -> Digest {
        Digest::of(&self.canonical_bytes(attrs))
    }

    /// Wraps an element together with its digest.
    #[must_use]
    pub fn element(&self, attributes: ElementAttributes) -> CanonicalElement {
        CanonicalElement {
            digest: self.digest(&attributes),
            attributes,
        }
    }

    /// Builds a canonical set from elements in any order.
    #[must_use]
    pub fn set<I>(&self, elements: I) -> CanonicalSet
    where
        I: IntoIterator<Item = ElementAttributes>,
    {
        let mut set = CanonicalSet::new(self);
        for attrs in elements {
            set.insert(self.element(attrs));
        }
        set
    }
}

fn lookup<'a>(attrs: &'a ElementAttributes, path: &str) -> Option<&'a str> {
    match path.split_once('.') {
        Some((outer, inner)) => attrs
            .get(outer)
            .and_then(ElementValue::as_map)
            .and_then(|m| m.get(inner))
            .map(String::as_str),
        None => attrs.get(path).and_then(ElementValue::as_text),
    }
}

fn push_escaped(buf: &mut Vec<u8>, value: &str) {
    for &b in value.as_bytes() {
        if b == SEPARATOR || b == ESCAPE {
            buf.push(ESCAPE);
        }
        buf.push(b);
    }
}

/// An element of an unordered collection, identified by its digest.
///
/// Equality, ordering and hashing use the digest only: two elements are the
/// same set member iff their canonical forms hash equal.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalElement {
    digest: Digest,
    attributes: ElementAttributes,
}

impl CanonicalElement {
    #[must_use]
    pub const fn digest(&self) -> Digest {
        self.digest
    }

    #[must_use]
    pub const fn attributes(&self) -> &ElementAttributes {
        &self.attributes
    }

    /// Text attribute, or sub-map member when `key` is a dotted path.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        lookup(&self.attributes, key)
    }
}

impl PartialEq for CanonicalElement {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for CanonicalElement {}

impl Hash for CanonicalElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl PartialOrd for CanonicalElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest.cmp(&other.digest)
    }
}

/// An unordered collection of canonical elements.
///
/// Elements are keyed by digest, so inserting the same content twice keeps
/// one copy and enumeration order is the digest order regardless of the
/// order elements arrived in.
#[derive(Debug, Clone)]
pub struct CanonicalSet {
    policy: &'static str,
    elements: BTreeMap<Digest, CanonicalElement>,
}

impl CanonicalSet {
    /// Creates an empty set governed by a policy.
    #[must_use]
    pub fn new(policy: &CanonicalPolicy) -> Self {
        Self {
            policy: policy.name(),
            elements: BTreeMap::new(),
        }
    }

    /// Name of the policy that produced the digests.
    #[must_use]
    pub const fn policy(&self) -> &'static str {
        self.policy
    }

    /// Inserts an element. Returns false if an equal element was present.
    pub fn insert(&mut self, element: CanonicalElement) -> bool {
        if self.elements.contains_key(&element.digest) {
            return false;
        }
        self.elements.insert(element.digest, element);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn contains(&self, digest: Digest) -> bool {
        self.elements.contains_key(&digest)
    }

    #[must_use]
    pub fn get(&self, digest: Digest) -> Option<&CanonicalElement> {
        self.elements.get(&digest)
    }

    /// Elements in digest order.
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalElement> {
        self.elements.values()
    }

    /// The set of member digests.
    #[must_use]
    pub fn digests(&self) -> BTreeSet<Digest> {
        self.elements.keys().copied().collect()
    }

    /// Compares this set against a previously stored one.
    #[must_use]
    pub fn diff<'a>(&'a self, previous: &'a Self) -> SetDiff<'a> {
        SetDiff {
            added: self
                .iter()
                .filter(|e| !previous.contains(e.digest))
                .collect(),
            removed: previous
                .iter()
                .filter(|e| !self.contains(e.digest))
                .collect(),
        }
    }
}

impl PartialEq for CanonicalSet {
    fn eq(&self, other: &Self) -> bool {
        self.elements.keys().eq(other.elements.keys())
    }
}

impl Eq for CanonicalSet {}

impl Serialize for CanonicalSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.elements.values())
    }
}

impl<'a> IntoIterator for &'a CanonicalSet {
    type Item = &'a CanonicalElement;
    type IntoIter = std::collections::btree_map::Values<'a, Digest, CanonicalElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.values()
    }
}

/// Membership difference between two canonical sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<'a> {
    /// Elements present now but not before.
    pub added: Vec<&'a CanonicalElement>,
    /// Elements present before but not now.
    pub removed: Vec<&'a CanonicalElement>,
}

impl SetDiff<'_> {
    /// Returns true if the two sets had the same members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: CanonicalPolicy = CanonicalPolicy::new(
        "test",
        &["device_name", "ebs.volume_size", "ebs.volume_type", "virtual_name"],
    );

    fn attrs(pairs: &[(&str, &str)]) -> ElementAttributes {
        let mut out = ElementAttributes::new();
        let mut ebs = BTreeMap::new();
        for (k, v) in pairs {
            match k.strip_prefix("ebs.") {
                Some(inner) => {
                    ebs.insert(inner.to_string(), v.to_string());
                }
                None => {
                    out.insert(k.to_string(), ElementValue::from(*v));
                }
            }
        }
        if !ebs.is_empty() {
            out.insert("ebs".to_string(), ElementValue::Map(ebs));
        }
        out
    }

    #[test]
    fn test_canonical_bytes_layout() {
        let a = attrs(&[("device_name", "/dev/xvda"), ("ebs.volume_type", "gp3")]);
        let bytes = POLICY.canonical_bytes(&a);
        assert_eq!(bytes, b"/dev/xvda\x1f\x1fgp3\x1f\x1f".to_vec());
    }

    #[test]
    fn test_missing_keys_keep_segment_count() {
        let empty = POLICY.canonical_bytes(&ElementAttributes::new());
        assert_eq!(empty, vec![SEPARATOR; 4]);
    }

    #[test]
    fn test_separator_in_value_is_escaped() {
        // Without escaping these two would share a canonical form.
        let a = attrs(&[("device_name", "a\x1fb")]);
        let b = attrs(&[("device_name", "a"), ("ebs.volume_size", "b")]);
        assert_ne!(POLICY.canonical_bytes(&a), POLICY.canonical_bytes(&b));
        assert_ne!(POLICY.digest(&a), POLICY.digest(&b));
    }

    #[test]
    fn test_undeclared_keys_do_not_participate() {
        let a = attrs(&[("device_name", "/dev/sda1")]);
        let b = attrs(&[("device_name", "/dev/sda1"), ("no_device", "")]);
        assert_eq!(POLICY.digest(&a), POLICY.digest(&b));
    }

    #[test]
    fn test_value_change_changes_digest() {
        let gp2 = attrs(&[("device_name", "a"), ("ebs.volume_type", "gp2")]);
        let gp3 = attrs(&[("device_name", "a"), ("ebs.volume_type", "gp3")]);
        assert_ne!(POLICY.digest(&gp2), POLICY.digest(&gp3));
    }

    #[test]
    fn test_digest_is_crc32_of_canonical_bytes() {
        let a = attrs(&[("device_name", "a")]);
        let expected = crc32fast::hash(&POLICY.canonical_bytes(&a));
        assert_eq!(POLICY.digest(&a).value(), expected);
        assert_eq!(format!("{}", Digest(0xab)), "000000ab");
    }

    #[test]
    fn test_set_is_order_independent_and_dedupes() {
        let items = vec![
            attrs(&[("device_name", "a")]),
            attrs(&[("device_name", "b")]),
            attrs(&[("device_name", "a")]),
        ];
        let forward = POLICY.set(items.clone());
        let backward = POLICY.set(items.into_iter().rev());
        assert_eq!(forward.len(), 2);
        assert_eq!(forward, backward);
        assert_eq!(forward.digests(), backward.digests());
        let order: Vec<Digest> = forward.iter().map(CanonicalElement::digest).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_set_diff() {
        let before = POLICY.set(vec![attrs(&[("device_name", "a")]), attrs(&[("device_name", "b")])]);
        let after = POLICY.set(vec![attrs(&[("device_name", "b")]), attrs(&[("device_name", "c")])]);

        let diff = after.diff(&before);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].get("device_name"), Some("c"));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].get("device_name"), Some("a"));
        assert!(after.diff(&after).is_empty());
    }

    #[test]
    fn test_element_lookup_by_path() {
        let e = POLICY.element(attrs(&[("device_name", "a"), ("ebs.volume_size", "8")]));
        assert_eq!(e.get("ebs.volume_size"), Some("8"));
        assert_eq!(e.get("ebs.volume_type"), None);
        assert_eq!(e.get("ebs"), None);
    }

    #[test]
    fn test_set_serializes_as_digest_ordered_pairs() {
        let set = POLICY.set(vec![attrs(&[("device_name", "a")])]);
        let json = serde_json::to_value(&set).unwrap();
        let first = &json.as_array().unwrap()[0];
        assert_eq!(first["attributes"]["device_name"], "a");
        assert!(first["digest"].is_u64());
    }

    #[test]
    fn test_policy_order_check() {
        assert!(POLICY.is_canonical_order());
        assert!(!CanonicalPolicy::new("bad", &["b", "a"]).is_canonical_order());
    }
}
