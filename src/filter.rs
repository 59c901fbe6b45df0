//! Client-side name filtering.
//!
//! Owners, executable users and server-side filters shape the fetch request
//! and are applied by the fetcher. The only predicate evaluated here is the
//! optional `name_regex`, layered on top of whatever the fetcher returned.

use regex::Regex;
use tracing::warn;

use crate::error::ConfigError;
use crate::query::{compile_name_regex, QueryParams};
use crate::record::CandidateRecord;

/// A compiled display-name predicate.
#[derive(Debug, Clone)]
pub struct NameFilter {
    regex: Regex,
}

impl NameFilter {
    /// Compiles a name pattern.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRegex` if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        compile_name_regex(pattern).map(Self::from)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Returns true if the record has a non-empty display name matching the
    /// pattern.
    ///
    /// A record without a name has nothing to match against: it is skipped
    /// with a warning, never treated as a match or an error.
    #[must_use]
    pub fn matches(&self, record: &CandidateRecord) -> bool {
        match record.name() {
            Some(name) if !name.is_empty() => self.regex.is_match(name),
            _ => {
                warn!(
                    id = record.id(),
                    owner = record.owner().unwrap_or_default(),
                    "no name to match against, skipping record"
                );
                false
            }
        }
    }

    /// Retains matching records, preserving input order.
    #[must_use]
    pub fn apply(&self, candidates: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
        candidates.into_iter().filter(|r| self.matches(r)).collect()
    }
}

impl From<Regex> for NameFilter {
    fn from(regex: Regex) -> Self {
        Self { regex }
    }
}

/// Applies the query's name pattern, if any.
#[must_use]
pub fn filter_candidates(candidates: Vec<CandidateRecord>, params: &QueryParams) -> Vec<CandidateRecord> {
    match params.name_regex() {
        Some(regex) => NameFilter::from(regex.clone()).apply(candidates),
        None => candidates,
    }
}

/// Applies a raw name pattern.
///
/// # Errors
///
/// Returns `ConfigError::InvalidRegex` if the pattern does not compile.
pub fn filter_by_pattern(
    candidates: Vec<CandidateRecord>,
    pattern: &str,
) -> Result<Vec<CandidateRecord>, ConfigError> {
    Ok(NameFilter::new(pattern)?.apply(candidates))
}
