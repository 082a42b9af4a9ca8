//! Storage traits for the security index abstraction.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::types::{
    BulkItemResult, IndexState, RefreshPolicy, SearchQuery, SearchResponse, StoredDocument,
    WriteOutcome,
};

/// The contract between the security subsystem and the document store
/// backing the security index.
///
/// Implementations must be thread-safe (`Send + Sync`). All operations are
/// asynchronous; none may block the calling task.
///
/// # Concurrency
///
/// `update` takes the `(seq_no, primary_term)` pair the caller observed at
/// read time. If the document has moved past that revision the
/// implementation must fail with [`StoreError::VersionConflict`] and leave
/// the document untouched.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reports the lifecycle state of the security index.
    async fn index_state(&self) -> IndexState;

    /// Ensures the security index exists and is correctly versioned,
    /// creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShardUnavailable`] if the index cannot be
    /// prepared right now.
    async fn ensure_index(&self) -> Result<(), StoreError>;

    /// Creates a new document.
    ///
    /// Uses create semantics: the write fails if a document with this id
    /// already exists, which is what makes minting a superseding token
    /// document an at-most-once operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    async fn create(
        &self,
        id: &str,
        source: Value,
        refresh: RefreshPolicy,
    ) -> Result<WriteOutcome, StoreError>;

    /// Reads a document by id.
    ///
    /// Returns `None` if the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing
    /// documents.
    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Applies a partial update to a document.
    ///
    /// `partial` is deep-merged into the current source. When
    /// `if_seq_no`/`if_primary_term` are provided the update only succeeds
    /// against exactly that revision. An update that changes nothing
    /// reports [`WriteOutcome::Noop`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the document does not exist and
    /// [`StoreError::VersionConflict`] if the revision condition fails.
    async fn update(
        &self,
        id: &str,
        partial: Value,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
        refresh: RefreshPolicy,
    ) -> Result<WriteOutcome, StoreError>;

    /// Applies the same partial update to many documents.
    ///
    /// Item failures are reported per item; the call itself only fails
    /// when the whole request could not be executed.
    async fn bulk_update(
        &self,
        ids: &[String],
        partial: Value,
        refresh: RefreshPolicy,
    ) -> Result<Vec<BulkItemResult>, StoreError>;

    /// Runs a term-filter search with full source fetch.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues; an incomplete search is
    /// reported via [`SearchResponse::timed_out`], not as an error.
    async fn search(&self, query: SearchQuery) -> Result<SearchResponse, StoreError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
