//! The fetcher seam.
//!
//! A `Fetcher` calls the remote API with the request-shaping parts of a query
//! (owners, executable users, server-side filters) and returns raw records.
//! The core trusts that pre-filtering and never talks to the network itself.
//!
//! `InMemoryFetcher` is a thread-safe reference implementation for embedded
//! use and tests. It emulates the server-side semantics: owners match the
//! owner id, a configured alias attribute, or `self` for the configured
//! account; filter values support `*` and `?` wildcards; `tag:<Key>` filters
//! match tag values.

use std::collections::BTreeMap;
use std::sync::RwLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::query::{FilterSpec, QueryParams};
use crate::record::CandidateRecord;
use crate::tags::KeyValueTags;
use crate::value::Value;

/// Errors reported by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The backend rejected or failed the request.
    #[error("Fetch backend error: {0}")]
    Backend(String),

    /// The backend is temporarily unavailable (throttling, timeouts).
    #[error("Fetch backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned a record that could not be decoded.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl FetchError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The request-shaping part of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    pub owners: Vec<String>,
    pub executable_users: Option<Vec<String>>,
    pub filters: Vec<FilterSpec>,
}

impl From<&QueryParams> for FetchRequest {
    fn from(params: &QueryParams) -> Self {
        Self {
            owners: params.owners().to_vec(),
            executable_users: params.executable_users().map(<[String]>::to_vec),
            filters: params.filters().to_vec(),
        }
    }
}

/// Fetches raw candidate records for a request.
pub trait Fetcher: Send + Sync {
    /// Returns every record the backend considers a match, in backend order.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<CandidateRecord>, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<CandidateRecord>, FetchError> {
        (**self).fetch(request)
    }
}

/// Attribute listing the users allowed to launch a record; `all` means
/// public.
pub const LAUNCH_PERMISSIONS: &str = "launch_permissions";

/// Attribute holding a record's tags.
pub const TAGS: &str = "tags";

fn lock_err(context: &'static str) -> FetchError {
    FetchError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory fetcher.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    records: RwLock<Vec<CandidateRecord>>,
    account_id: Option<String>,
    owner_alias_field: Option<&'static str>,
    filter_aliases: BTreeMap<&'static str, &'static str>,
}

impl InMemoryFetcher {
    /// Creates an empty fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account id that the `self` owner refers to.
    #[must_use]
    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Attribute that holds an owner alias (e.g. `amazon`).
    #[must_use]
    pub fn with_owner_alias_field(mut self, field: &'static str) -> Self {
        self.owner_alias_field = Some(field);
        self
    }

    /// Maps filter names onto dotted attribute paths.
    ///
    /// Names without an alias map by replacing `-` with `_`.
    #[must_use]
    pub fn with_filter_aliases(mut self, aliases: &[(&'static str, &'static str)]) -> Self {
        self.filter_aliases.extend(aliases.iter().copied());
        self
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Backend` if the lock is poisoned.
    pub fn insert(&self, record: CandidateRecord) -> Result<(), FetchError> {
        self.records
            .write()
            .map_err(|_| lock_err("insert"))?
            .push(record);
        Ok(())
    }

    /// Adds several records, preserving order.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Backend` if the lock is poisoned.
    pub fn extend(&self, records: impl IntoIterator<Item = CandidateRecord>) -> Result<(), FetchError> {
        self.records
            .write()
            .map_err(|_| lock_err("extend"))?
            .extend(records);
        Ok(())
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Backend` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, FetchError> {
        Ok(self.records.read().map_err(|_| lock_err("len"))?.len())
    }

    fn owner_matches(&self, record: &CandidateRecord, owners: &[String]) -> bool {
        let alias = self.owner_alias_field.and_then(|f| record.get_str(f));
        owners.iter().any(|owner| {
            let owner = self.resolve_self(owner);
            record.owner() == Some(owner) || alias == Some(owner)
        })
    }

    /// `self` stands for the configured account, as it does for owners.
    fn resolve_self<'a>(&'a self, principal: &'a str) -> &'a str {
        match (principal, self.account_id.as_deref()) {
            ("self", Some(account)) => account,
            _ => principal,
        }
    }

    fn executable_by(&self, record: &CandidateRecord, users: &[String]) -> bool {
        let permitted: Vec<String> = record
            .get(LAUNCH_PERMISSIONS)
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::to_text)
            .collect();
        users.iter().any(|user| {
            let user = self.resolve_self(user);
            permitted.iter().any(|p| p == user || p == "all")
        })
    }

    fn filter_values(&self, record: &CandidateRecord, name: &str) -> Vec<String> {
        if let Some(key) = name.strip_prefix("tag:") {
            return KeyValueTags::from_value(record.get(TAGS))
                .into_map()
                .remove(key)
                .into_iter()
                .collect();
        }
        let path = self
            .filter_aliases
            .get(name)
            .map_or_else(|| name.replace('-', "_"), |p| (*p).to_string());
        let mut out = Vec::new();
        let segments: Vec<&str> = path.split('.').collect();
        if let Some((first, rest)) = segments.split_first() {
            if let Some(root) = record.get(first) {
                collect_leaves(root, rest, &mut out);
            }
        }
        out
    }

    fn filter_matches(&self, record: &CandidateRecord, filter: &FilterSpec) -> bool {
        let actual = self.filter_values(record, filter.name());
        filter.values().iter().any(|pattern| {
            let Some(re) = wildcard_regex(pattern) else {
                return false;
            };
            actual.iter().any(|v| re.is_match(v))
        })
    }

    fn accepts(&self, record: &CandidateRecord, request: &FetchRequest) -> bool {
        self.owner_matches(record, &request.owners)
            && request
                .executable_users
                .as_deref()
                .map_or(true, |users| self.executable_by(record, users))
            && request.filters.iter().all(|f| self.filter_matches(record, f))
    }
}

impl Fetcher for InMemoryFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<CandidateRecord>, FetchError> {
        let records = self.records.read().map_err(|_| lock_err("fetch"))?;
        Ok(records
            .iter()
            .filter(|r| self.accepts(r, request))
            .cloned()
            .collect())
    }
}

/// Walks a dotted path, fanning out over lists, collecting scalar leaves.
fn collect_leaves(value: &Value, path: &[&str], out: &mut Vec<String>) {
    match (value, path.split_first()) {
        (Value::List(items), _) => {
            for item in items {
                collect_leaves(item, path, out);
            }
        }
        (Value::Map(map), Some((head, rest))) => {
            if let Some(next) = map.get(*head) {
                collect_leaves(next, rest, out);
            }
        }
        (leaf, None) => out.extend(leaf.to_text()),
        (_, Some(_)) => {}
    }
}

/// Translates a filter value with `*` / `?` wildcards into an anchored regex.
fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{IMAGE_FILTER_ALIASES, IMAGE_KEYS};
    use crate::query::QueryBuilder;
    use serde_json::json;

    fn fetcher() -> InMemoryFetcher {
        let f = InMemoryFetcher::new()
            .with_account_id("111111111111")
            .with_owner_alias_field("image_owner_alias")
            .with_filter_aliases(IMAGE_FILTER_ALIASES);
        let records = [
            json!({
                "image_id": "ami-1", "owner_id": "137112412989", "image_owner_alias": "amazon",
                "name": "amzn2-ami-hvm-2.0-x86_64-gp2", "architecture": "x86_64",
                "launch_permissions": ["all"],
                "block_device_mappings": [{"device_name": "/dev/xvda", "ebs": {"volume_type": "gp2"}}],
                "tags": [{"key": "Team", "value": "platform"}]
            }),
            json!({
                "image_id": "ami-2", "owner_id": "111111111111",
                "name": "web-arm", "architecture": "arm64",
                "launch_permissions": ["222222222222"],
                "block_device_mappings": [{"device_name": "/dev/xvda", "ebs": {"volume_type": "gp3"}}]
            }),
        ];
        for r in records {
            f.insert(CandidateRecord::from_json(IMAGE_KEYS, r).unwrap()).unwrap();
        }
        f
    }

    fn fetch_ids(params: &QueryParams) -> Vec<String> {
        fetcher()
            .fetch(&FetchRequest::from(params))
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect()
    }

    #[test]
    fn test_owner_by_id_alias_and_self() {
        let q = |owner: &str| QueryBuilder::new().owner(owner).build().unwrap();
        assert_eq!(fetch_ids(&q("amazon")), vec!["ami-1"]);
        assert_eq!(fetch_ids(&q("137112412989")), vec!["ami-1"]);
        assert_eq!(fetch_ids(&q("self")), vec!["ami-2"]);
        assert!(fetch_ids(&q("999")).is_empty());
    }

    #[test]
    fn test_filters_and_combined_values_or_combined() {
        let params = QueryBuilder::new()
            .owners(["amazon", "self"])
            .filter("architecture", ["arm64", "i386"])
            .filter("name", ["web-*"])
            .build()
            .unwrap();
        assert_eq!(fetch_ids(&params), vec!["ami-2"]);
    }

    #[test]
    fn test_wildcards() {
        let params = QueryBuilder::new()
            .owners(["amazon", "self"])
            .filter("name", ["amzn2-ami-hvm-?.?-*"])
            .build()
            .unwrap();
        assert_eq!(fetch_ids(&params), vec!["ami-1"]);

        let re = wildcard_regex("a.b*").unwrap();
        assert!(re.is_match("a.bcd"));
        assert!(!re.is_match("axbcd"));
    }

    #[test]
    fn test_nested_and_aliased_filter() {
        let params = QueryBuilder::new()
            .owners(["amazon", "self"])
            .filter("block-device-mapping.volume-type", ["gp3"])
            .build()
            .unwrap();
        assert_eq!(fetch_ids(&params), vec!["ami-2"]);
    }

    #[test]
    fn test_tag_filter() {
        let params = QueryBuilder::new()
            .owners(["amazon", "self"])
            .filter("tag:Team", ["platform"])
            .build()
            .unwrap();
        assert_eq!(fetch_ids(&params), vec!["ami-1"]);
    }

    #[test]
    fn test_executable_users() {
        let params = QueryBuilder::new()
            .owners(["amazon", "self"])
            .executable_users(["222222222222"])
            .build()
            .unwrap();
        // ami-1 is public, ami-2 is shared explicitly.
        assert_eq!(fetch_ids(&params), vec!["ami-1", "ami-2"]);

        let params = QueryBuilder::new()
            .owner("self")
            .executable_users(["333333333333"])
            .build()
            .unwrap();
        assert!(fetch_ids(&params).is_empty());
    }

    #[test]
    fn test_executable_users_self_is_the_account() {
        let f = InMemoryFetcher::new().with_account_id("111111111111");
        f.insert(
            CandidateRecord::from_json(
                IMAGE_KEYS,
                json!({
                    "image_id": "ami-shared", "owner_id": "444444444444",
                    "launch_permissions": ["111111111111"]
                }),
            )
            .unwrap(),
        )
        .unwrap();

        let params = QueryBuilder::new()
            .owner("444444444444")
            .executable_users(["self"])
            .build()
            .unwrap();
        let fetched = f.fetch(&FetchRequest::from(&params)).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id(), "ami-shared");

        let unconfigured = InMemoryFetcher::new();
        unconfigured.extend(fetched).unwrap();
        assert!(unconfigured.fetch(&FetchRequest::from(&params)).unwrap().is_empty());
    }

    #[test]
    fn test_retryable() {
        assert!(FetchError::Unavailable("x".into()).is_retryable());
        assert!(!FetchError::InvalidRecord("x".into()).is_retryable());
    }

    #[test]
    fn test_len() {
        assert_eq!(fetcher().len().unwrap(), 2);
    }
}
