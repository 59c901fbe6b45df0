//! Query parameters and their builder.
//!
//! A `QueryParams` is the validated form of a lookup query. It can be built
//! with the fluent `QueryBuilder` or loaded from a JSON query document; both
//! paths run the same validation, so a `QueryParams` in hand always has at
//! least one owner, non-empty filters and a compiled name pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One server-side filter: a name and the values it may take.
///
/// Values are OR-combined; a query's filters are AND-combined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FilterSpec {
    name: String,
    values: Vec<String>,
}

impl FilterSpec {
    /// Creates a validated filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or there are no values.
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyFilterName);
        }
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(ConfigError::EmptyFilterValues { name });
        }
        Ok(Self { name, values })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            values: Vec<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        FilterSpec::new(raw.name, raw.values).map_err(serde::de::Error::custom)
    }
}

/// Compiles a name pattern.
///
/// # Errors
///
/// Returns `ConfigError::InvalidRegex` naming the pattern.
pub fn compile_name_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// A validated lookup query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    owners: Vec<String>,
    executable_users: Option<Vec<String>>,
    filters: Vec<FilterSpec>,
    name_regex: Option<Regex>,
    most_recent: bool,
}

impl QueryParams {
    /// Loads a query from a JSON document.
    ///
    /// ```
    /// use imagelookup::QueryParams;
    ///
    /// let params = QueryParams::from_json(r#"{
    ///     "owners": ["amazon"],
    ///     "filter": [{"name": "name", "values": ["amzn2-ami-hvm-*"]}],
    ///     "name_regex": "^amzn2",
    ///     "most_recent": true
    /// }"#).unwrap();
    ///
    /// assert!(params.most_recent());
    /// assert_eq!(params.filters().len(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDocument` for malformed JSON and the
    /// usual validation errors otherwise.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: QueryDocument =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidDocument {
                reason: e.to_string(),
            })?;
        doc.try_into()
    }

    #[must_use]
    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    #[must_use]
    pub fn executable_users(&self) -> Option<&[String]> {
        self.executable_users.as_deref()
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    #[must_use]
    pub const fn name_regex(&self) -> Option<&Regex> {
        self.name_regex.as_ref()
    }

    #[must_use]
    pub const fn most_recent(&self) -> bool {
        self.most_recent
    }
}

/// The serialized shape of a query, as written in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDocument {
    /// Owner account ids or aliases.
    #[serde(default)]
    pub owners: Vec<String>,
    /// Users with launch permission.
    #[serde(default)]
    pub executable_users: Option<Vec<String>>,
    /// Server-side filters.
    #[serde(default, alias = "filters")]
    pub filter: Vec<FilterSpec>,
    /// Client-side name pattern.
    #[serde(default)]
    pub name_regex: Option<String>,
    /// Pick the newest record when several match.
    #[serde(default)]
    pub most_recent: bool,
}

impl TryFrom<QueryDocument> for QueryParams {
    type Error = ConfigError;

    fn try_from(doc: QueryDocument) -> Result<Self, Self::Error> {
        let mut builder = QueryBuilder::new().owners(doc.owners);
        if let Some(users) = doc.executable_users {
            builder = builder.executable_users(users);
        }
        for filter in doc.filter {
            builder = builder.filter_spec(filter);
        }
        if let Some(pattern) = doc.name_regex {
            builder = builder.name_regex(pattern);
        }
        builder.most_recent(doc.most_recent).build()
    }
}

/// Builder for `QueryParams`.
///
/// # Example
/// ```rust
/// use imagelookup::QueryBuilder;
///
/// let params = QueryBuilder::new()
///     .owner("099720109477")
///     .filter("virtualization-type", ["hvm"])
///     .name_regex("^ubuntu/images/")
///     .most_recent(true)
///     .build()
///     .unwrap();
/// assert_eq!(params.owners(), ["099720109477"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    owners: Vec<String>,
    executable_users: Option<Vec<String>>,
    /// In insertion order; validation errors surface from `build`.
    filters: Vec<Result<FilterSpec, ConfigError>>,
    name_regex: Option<String>,
    most_recent: bool,
}

impl QueryBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owner (account id, alias, or `self`).
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owners.push(owner.into());
        self
    }

    /// Add several owners, preserving order.
    #[must_use]
    pub fn owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owners.extend(owners.into_iter().map(Into::into));
        self
    }

    /// Restrict to records the given users may launch.
    #[must_use]
    pub fn executable_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executable_users = Some(users.into_iter().map(Into::into).collect());
        self
    }

    /// Add a server-side filter.
    #[must_use]
    pub fn filter<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(FilterSpec::new(name, values));
        self
    }

    /// Add an already validated filter.
    #[must_use]
    pub fn filter_spec(mut self, filter: FilterSpec) -> Self {
        self.filters.push(Ok(filter));
        self
    }

    /// Set the client-side name pattern.
    #[must_use]
    pub fn name_regex(mut self, pattern: impl Into<String>) -> Self {
        self.name_regex = Some(pattern.into());
        self
    }

    /// Pick the newest record when several match (default: false).
    #[must_use]
    pub fn most_recent(mut self, most_recent: bool) -> Self {
        self.most_recent = most_recent;
        self
    }

    /// Build the query.
    ///
    /// Returns `ConfigError` if:
    /// - no owner was given, or an owner is empty
    /// - a filter has an empty name or no values
    /// - the name pattern does not compile
    pub fn build(self) -> Result<QueryParams, ConfigError> {
        if self.owners.is_empty() {
            return Err(ConfigError::EmptyOwners);
        }
        if let Some(index) = self.owners.iter().position(|o| o.trim().is_empty()) {
            return Err(ConfigError::EmptyOwner { index });
        }

        // Filters form a set: identical entries collapse, first one wins.
        let mut filters: Vec<FilterSpec> = Vec::with_capacity(self.filters.len());
        for filter in self.filters {
            let filter = filter?;
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }

        let name_regex = self
            .name_regex
            .as_deref()
            .map(compile_name_regex)
            .transpose()?;

        Ok(QueryParams {
            owners: self.owners,
            executable_users: self.executable_users,
            filters,
            name_regex,
            most_recent: self.most_recent,
        })
    }
}
