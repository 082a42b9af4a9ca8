//! Token repository: the security subsystem's view of the document store.
//!
//! Wraps the raw [`DocumentStore`] with the behaviors every token
//! operation needs:
//!
//! - **prepare-then-execute**: writes are gated on the security index
//!   being present and available, creating it if needed;
//! - **origin tagging**: every store call runs inside a span carrying the
//!   security origin, so cluster auditing sees these requests as
//!   internal. The span travels across await points and backoff waits,
//!   which is what keeps the context attached across retries;
//! - **retry**: lookups that the callers cannot progress without are
//!   retried on shard-unavailability with the caller's backoff iterator.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::Instrument;

use spindrift_store::{
    BackoffIter, BulkItemResult, DocumentStore, IndexState, RefreshPolicy, SearchQuery,
    SearchResponse, StoreError, StoredDocument, WriteOutcome,
};

use crate::error::AuthError;
use crate::types::TOKEN_DOC_TYPE;

/// Marker recorded on every security-index request span.
const SECURITY_ORIGIN: &str = "security";

fn origin_span(op: &'static str) -> tracing::Span {
    tracing::debug_span!("security_index", origin = SECURITY_ORIGIN, op = op)
}

/// CRUD over token documents with origin tagging and retry.
pub struct TokenRepository {
    store: Arc<dyn DocumentStore>,
}

impl TokenRepository {
    /// Creates a repository over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The lifecycle state of the security index.
    pub async fn index_state(&self) -> IndexState {
        self.store.index_state().await
    }

    /// Creates a token document with create semantics and wait-until
    /// visibility.
    ///
    /// # Errors
    ///
    /// Surfaces store failures; an outcome other than `Created` means the
    /// store broke its create contract and is a fatal inconsistency.
    pub async fn create_document(&self, doc_id: &str, source: Value) -> Result<(), AuthError> {
        let outcome = async {
            self.store.ensure_index().await?;
            self.store
                .create(doc_id, source, RefreshPolicy::WaitUntil)
                .await
        }
        .instrument(origin_span("create"))
        .await?;
        if outcome == WriteOutcome::Created {
            Ok(())
        } else {
            Err(AuthError::inconsistency(format!(
                "failed to create token document [{doc_id}]: outcome was {outcome:?}"
            )))
        }
    }

    /// Reads a token document.
    pub async fn get_document(&self, doc_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.store
            .get(doc_id)
            .instrument(origin_span("get"))
            .await
    }

    /// Reads a token document, retrying shard-unavailability against the
    /// caller's backoff budget.
    ///
    /// # Errors
    ///
    /// Returns the final shard-unavailable error once the budget is
    /// exhausted; other failures are not retried.
    pub async fn get_document_retrying(
        &self,
        doc_id: &str,
        backoff: &mut BackoffIter,
    ) -> Result<Option<StoredDocument>, StoreError> {
        loop {
            match self.get_document(doc_id).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_shard_unavailable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(doc_id, delay_ms = delay.as_millis() as u64,
                            "could not get token document, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(doc_id, "could not get token document after all retries");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Finds the single token document holding the given refresh string.
    ///
    /// Transient failures (unavailable index, shard errors, search
    /// timeouts) are retried against the caller's backoff budget; on
    /// exhaustion the caller sees an invalid-grant failure rather than an
    /// internal error, because from the client's view the refresh simply
    /// did not succeed.
    ///
    /// # Errors
    ///
    /// - no match: invalid grant
    /// - more than one match: fatal inconsistency
    pub async fn find_token_by_refresh_token(
        &self,
        refresh_token: &str,
        backoff: &mut BackoffIter,
    ) -> Result<StoredDocument, AuthError> {
        let could_not_refresh =
            || AuthError::invalid_grant("could not refresh the requested token");
        loop {
            match self.index_state().await {
                IndexState::Missing => {
                    tracing::warn!(
                        "security index does not exist, refresh token cannot be validated"
                    );
                    return Err(could_not_refresh());
                }
                IndexState::Unavailable => {
                    match backoff.next() {
                        Some(delay) => {
                            tracing::debug!("security index unavailable for refresh, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => return Err(could_not_refresh()),
                    }
                }
                IndexState::Available => {}
            }
            let query = SearchQuery::new()
                .with_term("doc_type", TOKEN_DOC_TYPE)
                .with_term("refresh_token.token", refresh_token);
            let result = self
                .store
                .search(query)
                .instrument(origin_span("search"))
                .await;
            match result {
                Ok(response) if response.timed_out => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!("refresh token search timed out, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(could_not_refresh()),
                },
                Ok(mut response) => {
                    return match response.hits.len() {
                        0 => {
                            tracing::warn!("could not find token document for refresh token");
                            Err(could_not_refresh())
                        }
                        1 => Ok(response.hits.remove(0)),
                        _ => Err(AuthError::inconsistency(
                            "multiple tokens share the same refresh token",
                        )),
                    };
                }
                Err(e) if e.is_shard_unavailable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(
                            "refresh token search failed on unavailable shards, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(could_not_refresh()),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Applies a partial update gated on the revision the caller read.
    ///
    /// Uses immediate refresh so a concurrent refresh attempt observes
    /// the outcome as soon as the call returns.
    pub async fn conditional_update(
        &self,
        doc_id: &str,
        partial: Value,
        seq_no: u64,
        primary_term: u64,
    ) -> Result<WriteOutcome, StoreError> {
        async {
            self.store.ensure_index().await?;
            self.store
                .update(
                    doc_id,
                    partial,
                    Some(seq_no),
                    Some(primary_term),
                    RefreshPolicy::Immediate,
                )
                .await
        }
        .instrument(origin_span("update"))
        .await
    }

    /// Marks `<prefix>.invalidated = true` on each document in one bulk
    /// request with wait-until visibility.
    pub async fn bulk_set_invalidated(
        &self,
        doc_ids: &[String],
        prefix: &str,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        let partial = json!({ prefix: { "invalidated": true } });
        async {
            self.store.ensure_index().await?;
            self.store
                .bulk_update(doc_ids, partial, RefreshPolicy::WaitUntil)
                .await
        }
        .instrument(origin_span("bulk_update"))
        .await
    }

    /// Runs a term search with full source fetch.
    pub async fn search_tokens(&self, query: SearchQuery) -> Result<SearchResponse, StoreError> {
        self.store
            .search(query)
            .instrument(origin_span("search"))
            .await
    }
}
