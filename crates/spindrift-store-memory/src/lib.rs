//! # spindrift-store-memory
//!
//! In-memory [`DocumentStore`] backend.
//!
//! Used by tests and single-node deployments. Implements the full
//! optimistic-concurrency contract: every successful write advances a
//! sequence counter, conditional updates compare the caller's observed
//! `(seq_no, primary_term)` against the stored revision, and partial
//! updates deep-merge JSON objects with no-op detection.
//!
//! The backend also carries failure-injection hooks so retry behavior can
//! be exercised deterministically: errors queued with
//! [`MemoryDocumentStore::inject_failure`] are returned by the next
//! matching operations, and the index lifecycle state can be forced with
//! [`MemoryDocumentStore::set_index_state`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use spindrift_store::{
    BulkItemResult, DocumentStore, IndexState, RefreshPolicy, SearchQuery, SearchResponse,
    StoreError, StoredDocument, WriteOutcome,
};

/// The store operation kinds failures can be injected against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Document creation.
    Create,
    /// Point reads.
    Get,
    /// Single-document updates.
    Update,
    /// Bulk updates (whole-request failures).
    BulkUpdate,
    /// Term searches.
    Search,
}

#[derive(Default)]
struct FailurePlan {
    /// Whole-operation failures, consumed in order per operation kind.
    by_op: HashMap<StoreOp, VecDeque<StoreError>>,
    /// Per-item failures for the next bulk updates, keyed by doc id.
    bulk_items: VecDeque<HashMap<String, StoreError>>,
    /// Forces `timed_out` on the next searches.
    search_timeouts: usize,
}

/// In-memory document store.
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, StoredDocument>>,
    seq_no: AtomicU64,
    primary_term: AtomicU64,
    index_state: Mutex<IndexState>,
    failures: Mutex<FailurePlan>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Creates a new empty store with an available index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            seq_no: AtomicU64::new(0),
            primary_term: AtomicU64::new(1),
            index_state: Mutex::new(IndexState::Available),
            failures: Mutex::new(FailurePlan::default()),
        }
    }

    /// Queues an error to be returned by the next `op` operation.
    ///
    /// Queued errors are consumed in FIFO order, one per call.
    pub fn inject_failure(&self, op: StoreOp, error: StoreError) {
        self.failures
            .lock()
            .expect("failure plan lock poisoned")
            .by_op
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Queues per-item failures for the next bulk update. Items not named
    /// in `failures` behave normally.
    pub fn inject_bulk_item_failures(&self, failures: HashMap<String, StoreError>) {
        self.failures
            .lock()
            .expect("failure plan lock poisoned")
            .bulk_items
            .push_back(failures);
    }

    /// Makes the next `count` searches report `timed_out` with no hits.
    pub fn inject_search_timeouts(&self, count: usize) {
        self.failures
            .lock()
            .expect("failure plan lock poisoned")
            .search_timeouts += count;
    }

    /// Forces the index lifecycle state.
    pub fn set_index_state(&self, state: IndexState) {
        *self.index_state.lock().expect("index state lock poisoned") = state;
    }

    /// Bumps the primary term, as a shard promotion would.
    pub fn bump_primary_term(&self) {
        self.primary_term.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of documents currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.lock().expect("docs lock poisoned").len()
    }

    /// Returns `true` if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected(&self, op: StoreOp) -> Option<StoreError> {
        self.failures
            .lock()
            .expect("failure plan lock poisoned")
            .by_op
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }

    fn next_seq_no(&self) -> u64 {
        self.seq_no.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Deep-merges `partial` into `target`. Objects merge recursively; any
/// other value replaces the target outright.
fn merge_partial(target: &mut Value, partial: &Value) {
    match (target, partial) {
        (Value::Object(target_map), Value::Object(partial_map)) => {
            for (key, value) in partial_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_partial(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, partial) => *target = partial.clone(),
    }
}

/// Resolves a dotted path (`"refresh_token.token"`) within a JSON value.
fn resolve_path<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = source;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn index_state(&self) -> IndexState {
        *self.index_state.lock().expect("index state lock poisoned")
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        let mut state = self.index_state.lock().expect("index state lock poisoned");
        match *state {
            IndexState::Missing => {
                *state = IndexState::Available;
                Ok(())
            }
            IndexState::Unavailable => {
                Err(StoreError::shard_unavailable("security index unavailable"))
            }
            IndexState::Available => Ok(()),
        }
    }

    async fn create(
        &self,
        id: &str,
        source: Value,
        _refresh: RefreshPolicy,
    ) -> Result<WriteOutcome, StoreError> {
        if let Some(error) = self.take_injected(StoreOp::Create) {
            return Err(error);
        }
        let seq_no = self.next_seq_no();
        let primary_term = self.primary_term.load(Ordering::SeqCst);
        let mut docs = self.docs.lock().expect("docs lock poisoned");
        if docs.contains_key(id) {
            return Err(StoreError::already_exists(id));
        }
        docs.insert(
            id.to_string(),
            StoredDocument::new(id, source, seq_no, primary_term),
        );
        Ok(WriteOutcome::Created)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        if let Some(error) = self.take_injected(StoreOp::Get) {
            return Err(error);
        }
        Ok(self
            .docs
            .lock()
            .expect("docs lock poisoned")
            .get(id)
            .cloned())
    }

    async fn update(
        &self,
        id: &str,
        partial: Value,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
        _refresh: RefreshPolicy,
    ) -> Result<WriteOutcome, StoreError> {
        if let Some(error) = self.take_injected(StoreOp::Update) {
            return Err(error);
        }
        let next_seq_no = self.next_seq_no();
        let mut docs = self.docs.lock().expect("docs lock poisoned");
        let doc = docs.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        if let Some(required) = if_seq_no {
            if doc.seq_no != required {
                return Err(StoreError::version_conflict(id, required, doc.seq_no));
            }
        }
        if let Some(required) = if_primary_term {
            if doc.primary_term != required {
                return Err(StoreError::version_conflict(id, required, doc.seq_no));
            }
        }
        let mut merged = doc.source.clone();
        merge_partial(&mut merged, &partial);
        if merged == doc.source {
            return Ok(WriteOutcome::Noop);
        }
        doc.source = merged;
        doc.seq_no = next_seq_no;
        Ok(WriteOutcome::Updated)
    }

    async fn bulk_update(
        &self,
        ids: &[String],
        partial: Value,
        refresh: RefreshPolicy,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        if let Some(error) = self.take_injected(StoreOp::BulkUpdate) {
            return Err(error);
        }
        let item_failures = self
            .failures
            .lock()
            .expect("failure plan lock poisoned")
            .bulk_items
            .pop_front()
            .unwrap_or_default();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(error) = item_failures.get(id) {
                // Reproduce the queued error without consuming the plan for
                // other ids in the same request.
                let replayed = match error {
                    StoreError::ShardUnavailable { message } => {
                        StoreError::shard_unavailable(message.clone())
                    }
                    other => StoreError::internal(other.to_string()),
                };
                results.push(BulkItemResult::err(id.clone(), replayed));
                continue;
            }
            let outcome = self
                .update(id, partial.clone(), None, None, refresh)
                .await;
            results.push(BulkItemResult {
                doc_id: id.clone(),
                outcome,
            });
        }
        Ok(results)
    }

    async fn search(&self, query: SearchQuery) -> Result<SearchResponse, StoreError> {
        if let Some(error) = self.take_injected(StoreOp::Search) {
            return Err(error);
        }
        {
            let mut failures = self.failures.lock().expect("failure plan lock poisoned");
            if failures.search_timeouts > 0 {
                failures.search_timeouts -= 1;
                return Ok(SearchResponse {
                    hits: Vec::new(),
                    timed_out: true,
                });
            }
        }
        let docs = self.docs.lock().expect("docs lock poisoned");
        let hits = docs
            .values()
            .filter(|doc| {
                query
                    .terms
                    .iter()
                    .all(|(path, value)| resolve_path(&doc.source, path) == Some(value))
            })
            .take(query.size)
            .cloned()
            .collect();
        Ok(SearchResponse::with_hits(hits))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
