//! # imagelookup - deterministic single-record lookups
//!
//! imagelookup resolves a declarative query against a control-plane API into
//! exactly one record, and flattens that record's nested, unordered
//! substructures into canonical sets whose members compare by digest. The
//! result can be diffed against a previously stored state without false
//! positives from reordering.
//!
//! ## Core Concepts
//!
//! - **QueryParams**: validated owners, filters, name pattern and the
//!   most-recent flag
//! - **Fetcher**: the seam to the remote API; the core never does I/O
//! - **Disambiguation**: explicit none / one / many policy with a stable
//!   newest-first tie-break
//! - **CanonicalPolicy**: per-collection declaration of which keys take part
//!   in element equality
//! - **ResolvedState**: the projected record, immutable once built
//!
//! ## Usage
//!
//! ```rust,ignore
//! use imagelookup::{image, LookupConfig, LookupEngine, QueryBuilder};
//!
//! let engine = LookupEngine::new(LookupConfig::new("us-east-1")?);
//! let params = QueryBuilder::new()
//!     .owner("amazon")
//!     .filter("name", ["amzn2-ami-hvm-*-x86_64-gp2"])
//!     .most_recent(true)
//!     .build()?;
//!
//! let state = engine.lookup(&fetcher, &image::IMAGE_DATA_SOURCE, &params)?;
//! let mappings = state.attributes().set("block_device_mappings");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod value;

// Pipeline stages
pub mod canonical;
pub mod disambiguate;
pub mod fetch;
pub mod filter;
pub mod flatten;
pub mod project;
pub mod tags;

pub mod engine;
pub mod image;

// Re-export primary types at crate root for convenience
pub use canonical::{CanonicalElement, CanonicalPolicy, CanonicalSet, Digest, ElementAttributes, ElementValue, SetDiff};
pub use config::{IgnoreTagsConfig, LookupConfig};
pub use engine::{BatchConfig, LookupEngine};
pub use error::{ConfigError, ErrorKind, LookupError, LookupResult, QuerySummary, ResolutionError};
pub use fetch::{FetchError, FetchRequest, Fetcher, InMemoryFetcher};
pub use filter::NameFilter;
pub use flatten::{AttributeValue, FlatAttributes, OutputShape};
pub use project::{Arn, DataSource, ResolvedState};
pub use query::{FilterSpec, QueryBuilder, QueryParams};
pub use record::{CandidateRecord, RecordKeys};
pub use value::Value;
