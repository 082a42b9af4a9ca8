//! End-to-end tests of the token service against the in-memory store and
//! the local cluster channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use time::OffsetDateTime;

use spindrift_auth::{
    Authentication, AuthenticationType, AuthError, Clock, CountingSweeper, ManualClock,
    TokenService, TokenServiceConfig,
};
use spindrift_cluster::{ClusterStateChannel, LocalChannel};
use spindrift_core::NodeVersion;
use spindrift_store::{DocumentStore, IndexState, StoreError};
use spindrift_store_memory::{MemoryDocumentStore, StoreOp};

struct Fixture {
    service: Arc<TokenService>,
    store: Arc<MemoryDocumentStore>,
    cluster: Arc<LocalChannel>,
    clock: Arc<ManualClock>,
    sweeper: Arc<CountingSweeper>,
}

fn fixture() -> Fixture {
    fixture_with(TokenServiceConfig::default(), NodeVersion::V7_1_0)
}

fn fixture_with(config: TokenServiceConfig, min_node_version: NodeVersion) -> Fixture {
    let store = Arc::new(MemoryDocumentStore::new());
    let cluster = Arc::new(LocalChannel::new(min_node_version));
    let clock = Arc::new(ManualClock::new(
        OffsetDateTime::from_unix_timestamp(1_722_470_400).unwrap(),
    ));
    let sweeper = Arc::new(CountingSweeper::new());
    let service = TokenService::new(
        config,
        clock.clone(),
        store.clone(),
        cluster.clone(),
        sweeper.clone(),
    )
    .expect("valid config");
    Fixture {
        service,
        store,
        cluster,
        clock,
        sweeper,
    }
}

fn alice() -> Authentication {
    Authentication::realm("alice", "r1")
}

impl Fixture {
    /// Creates a token pair for alice and returns (token, bearer, refresh).
    async fn mint(&self) -> (spindrift_auth::UserToken, String, String) {
        let (token, refresh) = self
            .service
            .create_oauth2_tokens(alice(), alice(), Map::new(), true)
            .await
            .expect("token creation failed");
        let bearer = self
            .service
            .access_token_string(&token)
            .await
            .expect("encoding failed");
        (token, bearer, refresh.expect("refresh token requested"))
    }
}

// =============================================================================
// Creation and validation
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn create_and_validate() {
    let f = fixture();
    let (token, bearer, _refresh) = f.mint().await;

    assert_eq!(token.authentication.username, "alice");
    assert_eq!(token.authentication.realm, "r1");
    assert_eq!(token.authentication.auth_type, AuthenticationType::Token);
    assert_eq!(
        token.expiration_time,
        f.clock.now() + Duration::from_secs(20 * 60)
    );

    let validated = f
        .service
        .authenticate(&bearer)
        .await
        .expect("validation errored")
        .expect("token should validate");
    assert_eq!(validated, token);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_is_rejected_with_challenge() {
    let f = fixture();
    let (_token, bearer, _refresh) = f.mint().await;

    f.clock.advance(Duration::from_secs(20 * 60 + 1));
    let err = f.service.authenticate(&bearer).await.unwrap_err();
    assert!(err.is_expired());
    assert_eq!(err.status(), 401);
    assert!(
        err.www_authenticate()
            .unwrap()
            .contains("The access token expired")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_bearer_is_no_token() {
    let f = fixture();
    assert!(f.service.authenticate("deadbeef").await.unwrap().is_none());
    assert!(f.service.authenticate("").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_index_yields_no_token() {
    let f = fixture();
    let (_token, bearer, _refresh) = f.mint().await;

    f.store.set_index_state(IndexState::Unavailable);
    assert!(f.service.authenticate(&bearer).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_service_fails_fast() {
    let config = TokenServiceConfig {
        enabled: false,
        ..Default::default()
    };
    let f = fixture_with(config, NodeVersion::V7_1_0);

    let err = f
        .service
        .create_oauth2_tokens(alice(), alice(), Map::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Disabled));

    assert!(f.service.authenticate("anything").await.unwrap().is_none());

    let err = f.service.refresh_token("r", alice()).await.unwrap_err();
    assert!(matches!(err, AuthError::Disabled));
}

#[tokio::test(flavor = "multi_thread")]
async fn authentication_and_metadata_readable_without_validation() {
    let f = fixture();
    let mut metadata = Map::new();
    metadata.insert("kibana".to_string(), serde_json::json!({"space": "ops"}));
    let (token, _) = f
        .service
        .create_oauth2_tokens(alice(), alice(), metadata.clone(), false)
        .await
        .unwrap();
    let bearer = f.service.access_token_string(&token).await.unwrap();

    // Even past expiration the authentication is still readable.
    f.clock.advance(Duration::from_secs(21 * 60));
    let (auth, meta) = f
        .service
        .get_authentication_and_metadata(&bearer)
        .await
        .unwrap();
    assert_eq!(auth.username, "alice");
    assert_eq!(meta, metadata);

    let err = f
        .service
        .get_authentication_and_metadata("garbage")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken));
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn refresh_happy_path_supersedes_original() {
    let f = fixture();
    let (token, _bearer, refresh) = f.mint().await;

    let (new_token, new_refresh) = f.service.refresh_token(&refresh, alice()).await.unwrap();
    assert_ne!(new_token.id, token.id);
    assert_ne!(new_refresh, refresh);
    assert_eq!(new_token.authentication.username, "alice");

    let original = f
        .store
        .get(&format!("token_{}", token.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.source["refresh_token"]["refreshed"], true);
    assert_eq!(
        original.source["refresh_token"]["superseded_by"],
        format!("token_{}", new_token.id)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_replay_returns_the_same_pair() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;

    let (first_token, first_refresh) = f.service.refresh_token(&refresh, alice()).await.unwrap();
    let (replayed_token, replayed_refresh) =
        f.service.refresh_token(&refresh, alice()).await.unwrap();
    assert_eq!(replayed_token.id, first_token.id);
    assert_eq!(replayed_refresh, first_refresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_replay_after_window_is_invalid_grant() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;

    f.service.refresh_token(&refresh, alice()).await.unwrap();
    f.clock.advance(Duration::from_secs(31));
    let err = f.service.refresh_token(&refresh, alice()).await.unwrap_err();
    assert!(err.is_invalid_grant());
    assert_eq!(err.status(), 400);
    assert!(err.error_description().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_by_wrong_client_is_invalid_grant() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;

    let err = f
        .service
        .refresh_token(&refresh, Authentication::realm("bob", "r1"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_grant());

    let err = f
        .service
        .refresh_token(&refresh, Authentication::realm("alice", "r2"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_past_24h_ceiling_is_invalid_grant() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;

    f.clock.advance(Duration::from_secs(24 * 60 * 60 + 1));
    let err = f.service.refresh_token(&refresh, alice()).await.unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_of_unknown_token_is_invalid_grant() {
    let f = fixture();
    let err = f
        .service
        .refresh_token("never-issued", alice())
        .await
        .unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_refreshes_converge_on_one_successor() {
    let f = fixture();
    let (token, _bearer, refresh) = f.mint().await;

    let attempts: Vec<_> = (0..5)
        .map(|_| f.service.refresh_token(&refresh, alice()))
        .collect();
    let results = futures::future::join_all(attempts).await;

    let mut pairs = Vec::new();
    for result in results {
        let (new_token, new_refresh) = result.expect("every concurrent refresh should succeed");
        pairs.push((new_token.id, new_refresh));
    }
    let (first_id, first_refresh) = pairs[0].clone();
    for (id, refresh) in &pairs {
        assert_eq!(*id, first_id, "all callers must observe the same pair");
        assert_eq!(*refresh, first_refresh);
    }

    // Exactly one superseding document was created.
    assert_eq!(f.store.len(), 2);
    let original = f
        .store
        .get(&format!("token_{}", token.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        original.source["refresh_token"]["superseded_by"],
        format!("token_{first_id}")
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_survives_transient_search_failures() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;
    for _ in 0..3 {
        f.store.inject_failure(
            StoreOp::Search,
            StoreError::shard_unavailable("replica relocating"),
        );
    }

    let result = f.service.refresh_token(&refresh, alice()).await;
    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn refresh_fails_once_retries_are_exhausted() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;
    // One more failure than the backoff budget of 8.
    for _ in 0..9 {
        f.store.inject_failure(
            StoreOp::Search,
            StoreError::shard_unavailable("replica relocating"),
        );
    }

    let err = f.service.refresh_token(&refresh, alice()).await.unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(start_paused = true)]
async fn search_timeouts_are_retried() {
    let f = fixture();
    let (_token, _bearer, refresh) = f.mint().await;
    f.store.inject_search_timeouts(2);

    let result = f.service.refresh_token(&refresh, alice()).await;
    assert!(result.is_ok());
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn invalidate_then_validate_reports_expired() {
    let f = fixture();
    let (token, bearer, _refresh) = f.mint().await;
    let doc_id = format!("token_{}", token.id);

    let result = f.service.invalidate_access_token(&bearer).await.unwrap();
    assert_eq!(result.invalidated, vec![doc_id.clone()]);
    assert!(result.previously_invalidated.is_empty());
    assert!(result.errors.is_empty());

    let err = f.service.authenticate(&bearer).await.unwrap_err();
    assert!(err.is_expired());

    // Repeating the invalidation reports the token as previously done.
    let result = f.service.invalidate_access_token(&bearer).await.unwrap();
    assert!(result.invalidated.is_empty());
    assert_eq!(result.previously_invalidated, vec![doc_id]);
    assert!(result.errors.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalidate_garbage_bearer_is_malformed() {
    let f = fixture();
    let err = f
        .service
        .invalidate_access_token("not-a-token")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken));
    assert_eq!(err.status(), 401);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalidate_refresh_token_blocks_refresh() {
    let f = fixture();
    let (token, _bearer, refresh) = f.mint().await;

    let result = f.service.invalidate_refresh_token(&refresh).await.unwrap();
    assert_eq!(result.invalidated, vec![format!("token_{}", token.id)]);

    let err = f.service.refresh_token(&refresh, alice()).await.unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(flavor = "multi_thread")]
async fn combined_invalidation_covers_both_halves() {
    let f = fixture();
    let (token, bearer, refresh) = f.mint().await;
    let doc_id = format!("token_{}", token.id);

    let result = f
        .service
        .invalidate_active_tokens_for_realm_and_user(Some("r1"), Some("alice"))
        .await
        .unwrap();
    // One pass per half, folded into a single aggregate.
    assert_eq!(result.invalidated, vec![doc_id.clone(), doc_id.clone()]);
    assert!(result.errors.is_empty());

    let doc = f.store.get(&doc_id).await.unwrap().unwrap();
    assert_eq!(doc.source["refresh_token"]["invalidated"], true);
    assert_eq!(doc.source["access_token"]["invalidated"], true);

    let err = f.service.authenticate(&bearer).await.unwrap_err();
    assert!(err.is_expired());
    let err = f.service.refresh_token(&refresh, alice()).await.unwrap_err();
    assert!(err.is_invalid_grant());
}

#[tokio::test(flavor = "multi_thread")]
async fn combined_invalidation_without_selector_is_rejected() {
    let f = fixture();
    let err = f
        .service
        .invalidate_active_tokens_for_realm_and_user(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRequest { .. }));

    // Nothing matching is an empty result, not an error.
    let result = f
        .service
        .invalidate_active_tokens_for_realm_and_user(Some("no-such-realm"), None)
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalidation_retries_unavailable_shards_and_folds_results() {
    let f = fixture();
    let (token, bearer, _refresh) = f.mint().await;
    let doc_id = format!("token_{}", token.id);

    let mut failures = HashMap::new();
    failures.insert(
        doc_id.clone(),
        StoreError::shard_unavailable("primary relocating"),
    );
    f.store.inject_bulk_item_failures(failures);

    let result = f.service.invalidate_access_token(&bearer).await.unwrap();
    assert_eq!(result.invalidated, vec![doc_id]);
    assert!(result.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalidation_reports_errors_after_exhaustion() {
    let f = fixture();
    let (token, bearer, _refresh) = f.mint().await;
    let doc_id = format!("token_{}", token.id);

    // Fail the item on every attempt: initial plus all 8 retries.
    for _ in 0..9 {
        let mut failures = HashMap::new();
        failures.insert(
            doc_id.clone(),
            StoreError::shard_unavailable("primary relocating"),
        );
        f.store.inject_bulk_item_failures(failures);
    }

    let result = f.service.invalidate_access_token(&bearer).await.unwrap();
    assert!(result.invalidated.is_empty());
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn sweeper_runs_at_most_once_per_interval() {
    let f = fixture();
    let (_token, bearer, _refresh) = f.mint().await;

    f.service.invalidate_access_token(&bearer).await.unwrap();
    assert_eq!(f.sweeper.submissions(), 1);

    // Within the interval nothing is resubmitted.
    let _ = f.service.invalidate_access_token(&bearer).await;
    assert_eq!(f.sweeper.submissions(), 1);

    f.clock.advance(Duration::from_secs(31 * 60));
    let _ = f.service.invalidate_access_token(&bearer).await;
    assert_eq!(f.sweeper.submissions(), 2);
}

// =============================================================================
// Active-token queries
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn active_tokens_are_scoped_by_realm_and_user() {
    let f = fixture();
    f.mint().await;
    f.service
        .create_oauth2_tokens(
            Authentication::realm("bob", "r1"),
            Authentication::realm("bob", "r1"),
            Map::new(),
            true,
        )
        .await
        .unwrap();
    f.service
        .create_oauth2_tokens(
            Authentication::realm("carol", "r2"),
            Authentication::realm("carol", "r2"),
            Map::new(),
            false,
        )
        .await
        .unwrap();

    let r1 = f
        .service
        .find_active_tokens_for_realm("r1", None)
        .await
        .unwrap();
    assert_eq!(r1.len(), 2);

    let alice_tokens = f.service.find_active_tokens_for_user("alice").await.unwrap();
    assert_eq!(alice_tokens.len(), 1);
    assert!(alice_tokens[0].1.is_some());

    let carol_tokens = f.service.find_active_tokens_for_user("carol").await.unwrap();
    assert_eq!(carol_tokens.len(), 1);
    assert!(carol_tokens[0].1.is_none(), "no refresh token was issued");
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_pairs_are_not_active() {
    let f = fixture();
    f.mint().await;

    // Past access expiry the refresh token still keeps the pair active.
    f.clock.advance(Duration::from_secs(21 * 60));
    let active = f
        .service
        .find_active_tokens_for_realm("r1", None)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    // Past the refresh ceiling nothing is active.
    f.clock.advance(Duration::from_secs(24 * 60 * 60));
    let active = f
        .service
        .find_active_tokens_for_realm("r1", None)
        .await
        .unwrap();
    assert!(active.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn active_token_queries_surface_index_state() {
    let f = fixture();
    f.mint().await;

    f.store.set_index_state(IndexState::Missing);
    let from_realm = f
        .service
        .find_active_tokens_for_realm("r1", None)
        .await
        .unwrap();
    assert!(from_realm.is_empty());
    let from_user = f.service.find_active_tokens_for_user("alice").await.unwrap();
    assert!(from_user.is_empty());

    // Both sibling queries surface unavailability the same way.
    f.store.set_index_state(IndexState::Unavailable);
    assert!(f.service.find_active_tokens_for_realm("r1", None).await.is_err());
    assert!(f.service.find_active_tokens_for_user("alice").await.is_err());
}

// =============================================================================
// Key rotation and the legacy format
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn legacy_token_survives_rotation_until_pruned() {
    let f = fixture_with(TokenServiceConfig::default(), NodeVersion::new(7, 0, 0));
    let (token, bearer, _refresh) = f.mint().await;
    assert_eq!(token.version, NodeVersion::new(7, 0, 0));

    let active_before = f.service.active_key_hash();
    f.service.rotate_keys_on_leader().await.unwrap();
    assert_ne!(f.service.active_key_hash(), active_before);

    // The old key is still in the ring, so the old bearer still decodes.
    let validated = f.service.authenticate(&bearer).await.unwrap();
    assert_eq!(validated.unwrap().id, token.id);

    // Newly minted tokens use the new active key and still decode.
    let (_token2, bearer2, _refresh2) = f.mint().await;
    assert!(f.service.authenticate(&bearer2).await.unwrap().is_some());

    // Pruning to the active key alone forgets the minting key.
    let pruned = f.service.prune_keys(1);
    f.service.refresh_token_keys(&pruned).unwrap();
    assert!(f.service.authenticate(&bearer).await.unwrap().is_none());
    assert!(f.service.authenticate(&bearer2).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_requires_leadership() {
    let f = fixture();
    f.cluster.set_local_node_is_leader(false);
    let err = f.service.rotate_keys_on_leader().await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidRequest { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_listener_installs_metadata_once() {
    let f = fixture();
    let handle = f.service.spawn_cluster_listener();

    // The leader observes the empty slot and installs its metadata.
    let mut waited = Duration::ZERO;
    while f.cluster.state().token_keys.is_none() {
        assert!(waited < Duration::from_secs(5), "metadata was never installed");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    let installed = f.cluster.state().token_keys.unwrap();
    assert_eq!(installed, f.service.token_metadata());

    handle.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn nodes_adopt_published_metadata() {
    // Two services sharing one cluster channel: the second node rebuilds
    // its ring from metadata published by the first.
    let store = Arc::new(MemoryDocumentStore::new());
    let cluster = Arc::new(LocalChannel::new(NodeVersion::new(7, 0, 0)));
    let clock = Arc::new(ManualClock::new(
        OffsetDateTime::from_unix_timestamp(1_722_470_400).unwrap(),
    ));
    let sweeper = Arc::new(CountingSweeper::new());
    let node_a = TokenService::new(
        TokenServiceConfig::default(),
        clock.clone(),
        store.clone(),
        cluster.clone(),
        sweeper.clone(),
    )
    .unwrap();
    let node_b = TokenService::new(
        TokenServiceConfig::default(),
        clock.clone(),
        store.clone(),
        cluster.clone(),
        sweeper,
    )
    .unwrap();

    // Node A publishes its keys; node B applies the observed metadata.
    let metadata = node_a.token_metadata();
    cluster
        .submit_token_keys(metadata.clone(), spindrift_cluster::Priority::Urgent)
        .await
        .unwrap();
    node_b
        .handle_cluster_state(&cluster.state())
        .await;
    assert_eq!(node_b.active_key_hash(), node_a.active_key_hash());

    // A legacy bearer minted by node A now validates on node B.
    let (token, _refresh) = node_a
        .create_oauth2_tokens(alice(), alice(), Map::new(), true)
        .await
        .unwrap();
    let bearer = node_a.access_token_string(&token).await.unwrap();
    let validated = node_b.authenticate(&bearer).await.unwrap();
    assert_eq!(validated.unwrap().id, token.id);
}
