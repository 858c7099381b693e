//! Client-side status reconciliation for in-flight conversions.
//!
//! [`ReconciliationCoordinator`] keeps a set of conversions in sync with the
//! server: it caches snapshots briefly, coalesces identical batch requests,
//! and polls on one shared timer with exponential backoff until every
//! tracked conversion is terminal.

pub mod cache;
pub mod coordinator;
pub mod fetcher;

pub use coordinator::{
    Clock, CoordinatorConfig, ReconciliationCoordinator, StatusView, TokioClock,
};
pub use fetcher::{FetchError, HttpStatusFetcher, StatusFetcher};
