//! Error types for imagelookup.
//!
//! All errors are strongly typed using thiserror so callers can branch on
//! the kind of failure (bad query, nothing found, too much found) instead of
//! parsing messages.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::query::QueryParams;

/// Malformed input to the core: the query or the configuration.
///
/// Never retried. Each variant names the offending parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("At least one owner is required")]
    EmptyOwners,

    #[error("Owner at index {index} cannot be empty")]
    EmptyOwner {
        index: usize,
    },

    #[error("Filter name cannot be empty")]
    EmptyFilterName,

    #[error("Filter '{name}' must have at least one value")]
    EmptyFilterValues {
        name: String,
    },

    #[error("Invalid name_regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid document: {reason}")]
    InvalidDocument {
        reason: String,
    },
}

/// Outcome of the none/one/many policy when it cannot pick a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("query returned no results")]
    NotFound,

    #[error("query returned {match_count} results; narrow the query or allow most-recent selection")]
    Ambiguous {
        match_count: usize,
    },
}

/// The query parameters echoed back in resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySummary {
    /// Owners the query was scoped to.
    pub owners: Vec<String>,
    /// Names of the server-side filters that were applied.
    pub filters: Vec<String>,
    /// The name pattern, if one was given.
    pub name_regex: Option<String>,
    /// Whether most-recent selection was requested.
    pub most_recent: bool,
}

impl QuerySummary {
    /// Summarizes a query for error reporting.
    #[must_use]
    pub fn of(params: &QueryParams) -> Self {
        Self {
            owners: params.owners().to_vec(),
            filters: params.filters().iter().map(|f| f.name().to_string()).collect(),
            name_regex: params.name_regex().map(|r| r.as_str().to_string()),
            most_recent: params.most_recent(),
        }
    }
}

impl fmt::Display for QuerySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owners=[{}]", self.owners.join(","))?;
        if !self.filters.is_empty() {
            write!(f, " filters=[{}]", self.filters.join(","))?;
        }
        if let Some(pattern) = &self.name_regex {
            write!(f, " name_regex={pattern:?}")?;
        }
        write!(f, " most_recent={}", self.most_recent)
    }
}

/// Closed set of error kinds, for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid query or configuration.
    Config,
    /// Nothing matched.
    NotFound,
    /// More than one record matched and most-recent was not requested.
    Ambiguous,
    /// The fetcher collaborator failed.
    Fetch,
}

/// Top-level error type for imagelookup.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "Your query returned no results ({fetched} fetched before name filtering). \
         Please change your search criteria and try again. [{query}]"
    )]
    NotFound {
        query: QuerySummary,
        fetched: usize,
    },

    #[error(
        "Your query returned {match_count} results. Please try a more specific search \
         criteria, or set `most_recent` to true. [{query}]"
    )]
    Ambiguous {
        query: QuerySummary,
        match_count: usize,
    },

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

impl LookupError {
    /// Lifts a policy outcome into a lookup error carrying the query.
    #[must_use]
    pub fn from_resolution(err: ResolutionError, params: &QueryParams, fetched: usize) -> Self {
        let query = QuerySummary::of(params);
        match err {
            ResolutionError::NotFound => Self::NotFound { query, fetched },
            ResolutionError::Ambiguous { match_count } => Self::Ambiguous { query, match_count },
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ambiguous { .. } => ErrorKind::Ambiguous,
            Self::Fetch(_) => ErrorKind::Fetch,
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the query matched nothing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the query matched more than one record.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// Only fetcher failures can be; the core itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Config(_) | Self::NotFound { .. } | Self::Ambiguous { .. } => false,
        }
    }
}

/// Result type alias for imagelookup operations.
pub type LookupResult<T> = Result<T, LookupError>;
