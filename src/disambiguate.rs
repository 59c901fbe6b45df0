//! The none/one/many resolution policy.
//!
//! The policy is pure so a resolution can be reproduced deterministically
//! from the same candidate list.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::ResolutionError;
use crate::record::CandidateRecord;

/// Parses a creation timestamp. Missing or malformed values yield `None`.
#[must_use]
pub fn parse_creation_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Sort key used for most-recent ordering: unparsable sorts as the minimum.
fn sort_key(record: &CandidateRecord) -> DateTime<Utc> {
    parse_creation_time(record.created()).unwrap_or_else(|| {
        warn!(
            id = record.id(),
            created = record.created().unwrap_or_default(),
            "unparsable creation timestamp, ranking record as oldest"
        );
        DateTime::<Utc>::MIN_UTC
    })
}

/// Orders records newest first.
///
/// The sort is stable: records with equal timestamps, including all records
/// whose timestamp is missing or unparsable, keep their input order.
pub fn order_most_recent(records: &mut [CandidateRecord]) {
    // Each timestamp is parsed once.
    records.sort_by_cached_key(|r| std::cmp::Reverse(sort_key(r)));
}

/// Picks exactly one record out of the filtered matches.
///
/// - no matches: `ResolutionError::NotFound`
/// - one match: that record
/// - several matches without `most_recent`: `ResolutionError::Ambiguous`
/// - several matches with `most_recent`: the newest, ties by input order
///
/// # Errors
///
/// Returns `ResolutionError` when the policy cannot pick a record.
pub fn resolve(
    mut matches: Vec<CandidateRecord>,
    most_recent: bool,
) -> Result<CandidateRecord, ResolutionError> {
    match matches.len() {
        0 => return Err(ResolutionError::NotFound),
        1 => {}
        match_count if !most_recent => {
            return Err(ResolutionError::Ambiguous { match_count });
        }
        match_count => {
            order_most_recent(&mut matches);
            debug!(match_count, selected = matches[0].id(), "selected most recent record");
        }
    }
    // Non-empty: checked above.
    Ok(matches.swap_remove(0))
}
