//! # spindrift-store
//!
//! Storage abstraction for the spindrift security index.
//!
//! This crate defines the contract between the security subsystem and the
//! underlying replicated document store: CRUD with optimistic concurrency
//! (`seq_no` / `primary_term` conditions), partial-document updates with
//! no-op detection, bulk updates with per-item results, term search, and
//! the exponential backoff policy used to retry transient failures.
//!
//! Backends implement [`DocumentStore`]; an in-memory backend lives in
//! `spindrift-store-memory`.

pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use retry::{BackoffIter, BackoffPolicy};
pub use traits::DocumentStore;
pub use types::{
    BulkItemResult, IndexState, RefreshPolicy, SearchQuery, SearchResponse, StoredDocument,
    WriteOutcome,
};

/// Type alias for store operation results.
pub type StoreResult<T> = Result<T, StoreError>;
