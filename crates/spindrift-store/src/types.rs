//! Data types used by the document store traits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A document as stored in the security index.
///
/// `seq_no` and `primary_term` identify the exact revision a reader
/// observed; conditional updates pass them back so that a write lands only
/// if no other writer got there first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    /// The document id.
    pub id: String,
    /// The full document content as JSON.
    pub source: Value,
    /// Sequence number of this revision.
    pub seq_no: u64,
    /// Primary term of this revision.
    pub primary_term: u64,
}

impl StoredDocument {
    /// Creates a new `StoredDocument`.
    #[must_use]
    pub fn new(id: impl Into<String>, source: Value, seq_no: u64, primary_term: u64) -> Self {
        Self {
            id: id.into(),
            source,
            seq_no,
            primary_term,
        }
    }
}

/// Visibility policy for a write.
///
/// Mirrors the store's refresh semantics: `WaitUntil` parks the response
/// until the write is visible to search, `Immediate` forces a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Do not wait for visibility.
    #[default]
    None,
    /// Respond once the write is visible to search.
    WaitUntil,
    /// Refresh immediately after the write.
    Immediate,
}

/// The result of a single document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// A new document was created.
    Created,
    /// The document content changed.
    Updated,
    /// The update produced no change to the document.
    Noop,
}

/// Per-document result of a bulk update.
#[derive(Debug)]
pub struct BulkItemResult {
    /// The id of the document this item addressed.
    pub doc_id: String,
    /// The outcome, or the error for this item alone.
    pub outcome: Result<WriteOutcome, StoreError>,
}

impl BulkItemResult {
    /// Creates a successful item result.
    #[must_use]
    pub fn ok(doc_id: impl Into<String>, outcome: WriteOutcome) -> Self {
        Self {
            doc_id: doc_id.into(),
            outcome: Ok(outcome),
        }
    }

    /// Creates a failed item result.
    #[must_use]
    pub fn err(doc_id: impl Into<String>, error: StoreError) -> Self {
        Self {
            doc_id: doc_id.into(),
            outcome: Err(error),
        }
    }
}

/// A term-filter search against the security index.
///
/// Paths are dotted into the document source, e.g.
/// `"refresh_token.token"`. All terms must match (AND semantics).
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Exact-match term filters.
    pub terms: Vec<(String, Value)>,
    /// Maximum number of hits to return.
    pub size: usize,
}

/// Default number of hits fetched by a search.
pub const DEFAULT_SEARCH_SIZE: usize = 1000;

impl SearchQuery {
    /// Creates a new empty query with the default size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            size: DEFAULT_SEARCH_SIZE,
        }
    }

    /// Adds an exact-match term filter.
    #[must_use]
    pub fn with_term(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((path.into(), value.into()));
        self
    }

    /// Sets the maximum number of hits.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// The response to a search.
#[derive(Debug, Default)]
pub struct SearchResponse {
    /// Matching documents, with their concurrency coordinates.
    pub hits: Vec<StoredDocument>,
    /// Whether the search timed out before visiting all shards. A
    /// timed-out response may be incomplete and callers retry it.
    pub timed_out: bool,
}

impl SearchResponse {
    /// Creates a response from hits.
    #[must_use]
    pub fn with_hits(hits: Vec<StoredDocument>) -> Self {
        Self {
            hits,
            timed_out: false,
        }
    }
}

/// Lifecycle state of the security index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// The index has not been created yet.
    Missing,
    /// The index exists but its shards are not currently usable.
    Unavailable,
    /// The index exists and is ready for reads and writes.
    Available,
}

impl IndexState {
    /// Returns `true` if reads and writes can be attempted.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}
