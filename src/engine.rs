//! The lookup pipeline.
//!
//! `LookupEngine` runs filter → disambiguate → project over candidates that
//! a fetcher already returned. Every stage is a pure function of its inputs,
//! so independent lookups share nothing but the engine's immutable config
//! and may run concurrently; `lookup_many` does exactly that on a small
//! bounded worker pool.

use std::thread;

use crossbeam_channel::{bounded, unbounded};
use tracing::debug;

use crate::config::LookupConfig;
use crate::disambiguate;
use crate::error::{LookupError, LookupResult};
use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::filter::filter_candidates;
use crate::project::{project, DataSource, ResolvedState};
use crate::query::QueryParams;
use crate::record::CandidateRecord;

/// Batch execution configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued queries.
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// Resolves queries into single projected records.
///
/// # Example
/// ```rust
/// use imagelookup::{image, CandidateRecord, LookupConfig, LookupEngine, QueryBuilder};
///
/// let engine = LookupEngine::new(LookupConfig::new("us-east-1").unwrap());
/// let params = QueryBuilder::new()
///     .owner("self")
///     .name_regex("^web-")
///     .most_recent(true)
///     .build()
///     .unwrap();
///
/// let candidates = vec![
///     CandidateRecord::new(image::IMAGE_KEYS)
///         .with("image_id", "ami-1")
///         .with("name", "web-2024-01-01")
///         .with("creation_date", "2024-01-01T00:00:00Z"),
///     CandidateRecord::new(image::IMAGE_KEYS)
///         .with("image_id", "ami-2")
///         .with("name", "web-2024-02-01")
///         .with("creation_date", "2024-02-01T00:00:00Z"),
/// ];
///
/// let state = engine.resolve(&image::IMAGE_DATA_SOURCE, &params, candidates).unwrap();
/// assert_eq!(state.id(), "ami-2");
/// ```
#[derive(Debug, Clone)]
pub struct LookupEngine {
    config: LookupConfig,
}

impl LookupEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(config: LookupConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Resolves already-fetched candidates.
    ///
    /// # Errors
    ///
    /// - `LookupError::NotFound` if nothing survives the name filter
    /// - `LookupError::Ambiguous` if several records survive and the query
    ///   did not ask for the most recent one
    pub fn resolve(
        &self,
        source: &DataSource,
        params: &QueryParams,
        candidates: Vec<CandidateRecord>,
    ) -> LookupResult<ResolvedState> {
        let fetched = candidates.len();
        let matches = filter_candidates(candidates, params);
        debug!(source = source.name, fetched, matched = matches.len(), "filtered candidates");

        let record = disambiguate::resolve(matches, params.most_recent())
            .map_err(|e| LookupError::from_resolution(e, params, fetched))?;
        debug!(source = source.name, id = record.id(), "resolved record");

        Ok(project(&record, source, &self.config))
    }

    /// Fetches candidates for a query, then resolves them.
    ///
    /// # Errors
    ///
    /// Fetch errors are returned as-is; see `resolve` for the rest.
    pub fn lookup<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        source: &DataSource,
        params: &QueryParams,
    ) -> LookupResult<ResolvedState> {
        let request = FetchRequest::from(params);
        debug!(source = source.name, request = ?request, "fetching candidates");
        let candidates = fetcher.fetch(&request)?;
        self.resolve(source, params, candidates)
    }

    /// Runs independent lookups concurrently.
    ///
    /// Results are returned in query order. A failed lookup does not affect
    /// the others.
    pub fn lookup_many<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        source: &DataSource,
        queries: &[QueryParams],
        batch: BatchConfig,
    ) -> Vec<LookupResult<ResolvedState>> {
        if queries.is_empty() {
            return Vec::new();
        }
        let workers = batch.workers.clamp(1, queries.len());
        debug!(source = source.name, queries = queries.len(), workers, "running batch lookup");

        let (result_tx, result_rx) = unbounded::<(usize, LookupResult<ResolvedState>)>();
        thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<(usize, &QueryParams)>(batch.queue_capacity.max(1));
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (idx, params) in job_rx {
                        let _ = result_tx.send((idx, self.lookup(fetcher, source, params)));
                    }
                });
            }
            for job in queries.iter().enumerate() {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<LookupResult<ResolvedState>>> =
            std::iter::repeat_with(|| None).take(queries.len()).collect();
        for (idx, result) in result_rx.try_iter() {
            slots[idx] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(FetchError::Backend("batch worker dropped query".to_string()).into())
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::{self, IMAGE_DATA_SOURCE, IMAGE_KEYS};
    use crate::query::QueryBuilder;

    fn engine() -> LookupEngine {
        LookupEngine::new(LookupConfig::new("us-east-1").unwrap())
    }

    fn web(id: &str, name: &str, created: &str) -> CandidateRecord {
        CandidateRecord::new(IMAGE_KEYS)
            .with("image_id", id)
            .with("owner_id", "111111111111")
            .with("name", name)
            .with("creation_date", created)
    }

    fn candidates() -> Vec<CandidateRecord> {
        vec![
            web("ami-c1", "web-2024-01-01", "2024-01-01T00:00:00Z"),
            web("ami-c2", "web-2024-02-01", "2024-02-01T00:00:00Z"),
        ]
    }

    fn params(regex: &str, most_recent: bool) -> QueryParams {
        QueryBuilder::new()
            .owner("self")
            .name_regex(regex)
            .most_recent(most_recent)
            .build()
            .unwrap()
    }

    #[test]
    fn test_most_recent_resolves_latest() {
        let state = engine()
            .resolve(&IMAGE_DATA_SOURCE, &params("^web-.*", true), candidates())
            .unwrap();
        assert_eq!(state.id(), "ami-c2");
    }

    #[test]
    fn test_ambiguous_without_most_recent() {
        let err = engine()
            .resolve(&IMAGE_DATA_SOURCE, &params("^web-.*", false), candidates())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ambiguous);
    }

    #[test]
    fn test_regex_matching_nothing_is_not_found() {
        let err = engine()
            .resolve(&IMAGE_DATA_SOURCE, &params("^db-.*", true), candidates())
            .unwrap_err();
        let LookupError::NotFound { fetched, .. } = err else {
            panic!("expected not found");
        };
        assert_eq!(fetched, 2);
    }

    #[test]
    fn test_lookup_through_fetcher() {
        let fetcher = image::in_memory_fetcher().with_account_id("111111111111");
        fetcher.extend(candidates()).unwrap();
        let state = engine()
            .lookup(&fetcher, &IMAGE_DATA_SOURCE, &params("^web-", true))
            .unwrap();
        assert_eq!(state.id(), "ami-c2");
    }

    #[test]
    fn test_lookup_many_preserves_order() {
        let fetcher = image::in_memory_fetcher().with_account_id("111111111111");
        fetcher.extend(candidates()).unwrap();
        let queries = vec![
            params("2024-01", false),
            params("^db-", false),
            params("^web-", true),
            params("^web-", false),
        ];
        let results = engine().lookup_many(
            &fetcher,
            &IMAGE_DATA_SOURCE,
            &queries,
            BatchConfig { workers: 3, queue_capacity: 1 },
        );
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().id(), "ami-c1");
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(results[2].as_ref().unwrap().id(), "ami-c2");
        assert_eq!(results[3].as_ref().unwrap_err().kind(), ErrorKind::Ambiguous);
    }

    #[test]
    fn test_lookup_many_empty() {
        let fetcher = image::in_memory_fetcher();
        let results = engine().lookup_many(&fetcher, &IMAGE_DATA_SOURCE, &[], BatchConfig::default());
        assert!(results.is_empty());
    }
}
