//! The token service.
//!
//! Process-wide service that mints, validates, refreshes and invalidates
//! access/refresh token pairs on behalf of the authentication subsystem.
//! Dependencies (store, clock, cluster channel, sweeper) are injected at
//! construction; the service owns the key manager and the codec's
//! derivation executor.
//!
//! The refresh engine lives in `refresh.rs` and the invalidation engine
//! in `invalidate.rs`; both are `impl TokenService` blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use spindrift_cluster::{ClusterState, ClusterStateChannel, Priority, TokenKeysMetadata};
use spindrift_core::random_token_id;
use spindrift_store::{BackoffPolicy, DocumentStore, IndexState, SearchQuery};

use crate::AuthResult;
use crate::clock::Clock;
use crate::codec::TokenCodec;
use crate::config::{ConfigError, TokenServiceConfig};
use crate::error::AuthError;
use crate::keys::{KeyDerivationExecutor, KeyManager};
use crate::repository::TokenRepository;
use crate::sweeper::ExpiredTokenSweeper;
use crate::types::millis;
use crate::types::{
    AccessTokenDoc, Authentication, ClientInfo, RefreshTokenDoc, TOKEN_DOC_TYPE, TokenDocument,
    UserToken, token_doc_id,
};

/// Name of the dedicated key-derivation thread.
pub const TOKEN_KEY_THREAD_NAME: &str = "security-token-key";

/// Hard lifetime ceiling of a refresh token, measured from document
/// creation.
pub(crate) const REFRESH_TOKEN_CEILING: time::Duration = time::Duration::hours(24);

/// The bearer token service.
pub struct TokenService {
    pub(crate) config: TokenServiceConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) repository: TokenRepository,
    pub(crate) cluster: Arc<dyn ClusterStateChannel>,
    pub(crate) codec: TokenCodec,
    pub(crate) keys: KeyManager,
    pub(crate) sweeper: Arc<dyn ExpiredTokenSweeper>,
    pub(crate) backoff: BackoffPolicy,
    /// Relative instant (epoch millis) of the last sweeper submission.
    last_sweep_ms: AtomicI64,
    /// Guards against queueing duplicate install-metadata submissions.
    install_in_progress: AtomicBool,
}

impl TokenService {
    /// Creates the service.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is out of range.
    pub fn new(
        config: TokenServiceConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn DocumentStore>,
        cluster: Arc<dyn ClusterStateChannel>,
        sweeper: Arc<dyn ExpiredTokenSweeper>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            clock,
            repository: TokenRepository::new(store),
            cluster,
            codec: TokenCodec::new(KeyDerivationExecutor::new(TOKEN_KEY_THREAD_NAME)),
            keys: KeyManager::bootstrap(),
            sweeper,
            backoff: BackoffPolicy::default(),
            last_sweep_ms: AtomicI64::new(0),
            install_in_progress: AtomicBool::new(false),
        }))
    }

    /// Whether the token service is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub(crate) fn ensure_enabled(&self) -> AuthResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(AuthError::Disabled)
        }
    }

    pub(crate) fn now(&self) -> time::OffsetDateTime {
        self.clock.now()
    }

    // =========================================================================
    // Minting and encoding
    // =========================================================================

    /// Creates an access token and optionally a refresh token for
    /// `authentication`, created on behalf of `originating_auth`.
    ///
    /// Returns the in-memory token and the refresh string to hand to the
    /// client. Use [`TokenService::access_token_string`] to produce the
    /// bearer string.
    ///
    /// # Errors
    ///
    /// Fails when the service is disabled or the document cannot be
    /// created.
    pub async fn create_oauth2_tokens(
        &self,
        authentication: Authentication,
        originating_auth: Authentication,
        metadata: Map<String, Value>,
        include_refresh_token: bool,
    ) -> AuthResult<(UserToken, Option<String>)> {
        self.ensure_enabled()?;
        self.create_oauth2_tokens_with_id(
            random_token_id(),
            authentication,
            originating_auth,
            metadata,
            include_refresh_token,
        )
        .await
    }

    pub(crate) async fn create_oauth2_tokens_with_id(
        &self,
        user_token_id: String,
        authentication: Authentication,
        originating_auth: Authentication,
        metadata: Map<String, Value>,
        include_refresh_token: bool,
    ) -> AuthResult<(UserToken, Option<String>)> {
        let created = self.now();
        let expiration = created + self.config.token_expiration;
        let version = self.cluster.state().min_node_version;
        let user_token = UserToken {
            id: user_token_id,
            version,
            authentication: authentication.retagged_as_token(),
            expiration_time: expiration,
            metadata,
        };
        let refresh_token = include_refresh_token.then(random_token_id);
        let document = TokenDocument {
            doc_type: TOKEN_DOC_TYPE.to_string(),
            creation_time: created,
            access_token: AccessTokenDoc {
                invalidated: false,
                realm: authentication.realm.clone(),
                user_token: user_token.clone(),
            },
            refresh_token: refresh_token.as_ref().map(|token| RefreshTokenDoc {
                token: token.clone(),
                invalidated: false,
                refreshed: false,
                refresh_time: None,
                superseded_by: None,
                client: ClientInfo {
                    client_type: "unassociated_client".to_string(),
                    user: originating_auth.username.clone(),
                    realm: originating_auth.realm.clone(),
                },
            }),
        };
        let doc_id = token_doc_id(&user_token.id);
        self.repository
            .create_document(&doc_id, document.to_source()?)
            .await?;
        tracing::debug!(doc_id, realm = %authentication.realm, "created token document");
        Ok((user_token, refresh_token))
    }

    /// Serializes a token to the opaque bearer string clients present.
    ///
    /// # Errors
    ///
    /// Fails only on internal key/cipher conditions.
    pub async fn access_token_string(&self, user_token: &UserToken) -> AuthResult<String> {
        let ring = self.keys.ring();
        let min_node_version = self.cluster.state().min_node_version;
        self.codec.encode(user_token, &ring, min_node_version).await
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Decodes and validates a bearer string.
    ///
    /// Returns `Ok(None)` when the bearer is not one of our tokens or the
    /// security index cannot currently vouch for it - another
    /// authenticator may own the credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] for an expired or invalidated
    /// token.
    pub async fn authenticate(&self, bearer: &str) -> AuthResult<Option<UserToken>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let ring = self.keys.ring();
        let Some(token_id) = self.codec.decode(bearer, &ring).await else {
            return Ok(None);
        };
        let Some(user_token) = self.get_user_token_from_id(&token_id).await? else {
            return Ok(None);
        };
        self.check_if_token_is_valid(user_token).await
    }

    /// Decodes a bearer string without validating expiration, returning
    /// the authentication and metadata stored on the token.
    ///
    /// # Errors
    ///
    /// Unlike [`TokenService::authenticate`], a bearer that does not
    /// decode to one of our tokens is an error here: the caller
    /// explicitly asked about this token.
    pub async fn get_authentication_and_metadata(
        &self,
        bearer: &str,
    ) -> AuthResult<(Authentication, Map<String, Value>)> {
        self.ensure_enabled()?;
        let ring = self.keys.ring();
        let Some(token_id) = self.codec.decode(bearer, &ring).await else {
            return Err(AuthError::MalformedToken);
        };
        let Some(user_token) = self.get_user_token_from_id(&token_id).await? else {
            return Err(AuthError::MalformedToken);
        };
        Ok((user_token.authentication, user_token.metadata))
    }

    /// Fetches the [`UserToken`] for a token id from its document.
    ///
    /// An unavailable index yields `Ok(None)`: the token cannot be
    /// vouched for, and another authenticator may still accept the
    /// bearer.
    pub(crate) async fn get_user_token_from_id(
        &self,
        token_id: &str,
    ) -> AuthResult<Option<UserToken>> {
        if self.repository.index_state().await != IndexState::Available {
            tracing::warn!(
                token_id,
                "failed to get access token because the security index is not available"
            );
            return Ok(None);
        }
        let doc_id = token_doc_id(token_id);
        match self.repository.get_document(&doc_id).await {
            Ok(Some(doc)) => {
                let document = TokenDocument::from_source(&doc.source)?;
                Ok(Some(document.access_token.user_token))
            }
            Ok(None) => Err(AuthError::inconsistency(
                "token document is missing and must be present",
            )),
            Err(e) if e.is_shard_unavailable() => {
                tracing::warn!(
                    token_id,
                    "failed to get access token because the security index is not available"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checks expiration and invalidation for a decoded token.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] when past the expiration instant or
    /// explicitly invalidated.
    pub(crate) async fn check_if_token_is_valid(
        &self,
        user_token: UserToken,
    ) -> AuthResult<Option<UserToken>> {
        if user_token.is_expired(self.now()) {
            return Err(AuthError::TokenExpired);
        }
        if self.repository.index_state().await == IndexState::Missing {
            tracing::warn!(
                "failed to validate access token because the security index does not exist"
            );
            return Ok(None);
        }
        let doc_id = token_doc_id(&user_token.id);
        match self.repository.get_document(&doc_id).await {
            Ok(Some(doc)) => {
                let document = TokenDocument::from_source(&doc.source)?;
                if document.access_token.invalidated {
                    Err(AuthError::TokenExpired)
                } else {
                    Ok(Some(user_token))
                }
            }
            Ok(None) => Err(AuthError::inconsistency(
                "token document is missing and must be present",
            )),
            Err(e) if e.is_shard_unavailable() => {
                tracing::warn!("failed to get access token because the security index is not available");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Active-token queries
    // =========================================================================

    /// Finds the active (non-invalidated, non-expired) token pairs issued
    /// against a realm, optionally filtered further by a predicate on the
    /// parsed token.
    ///
    /// # Errors
    ///
    /// A missing security index yields an empty result; an unavailable
    /// one surfaces the unavailability.
    pub async fn find_active_tokens_for_realm(
        &self,
        realm_name: &str,
        filter: Option<&(dyn Fn(&UserToken) -> bool + Sync)>,
    ) -> AuthResult<Vec<(UserToken, Option<String>)>> {
        self.ensure_enabled()?;
        if realm_name.is_empty() {
            return Err(AuthError::invalid_request("realm name is required"));
        }
        let query = SearchQuery::new()
            .with_term("doc_type", TOKEN_DOC_TYPE)
            .with_term("access_token.realm", realm_name);
        self.collect_active_tokens(query, filter).await
    }

    /// Finds the active token pairs issued for a user, in any realm.
    ///
    /// # Errors
    ///
    /// Same index handling as
    /// [`TokenService::find_active_tokens_for_realm`]: both queries take
    /// the same path.
    pub async fn find_active_tokens_for_user(
        &self,
        username: &str,
    ) -> AuthResult<Vec<(UserToken, Option<String>)>> {
        self.ensure_enabled()?;
        if username.is_empty() {
            return Err(AuthError::invalid_request("username is required"));
        }
        let query = SearchQuery::new().with_term("doc_type", TOKEN_DOC_TYPE);
        self.collect_active_tokens(
            query,
            Some(&|token: &UserToken| token.authentication.username == username),
        )
        .await
    }

    async fn collect_active_tokens(
        &self,
        query: SearchQuery,
        filter: Option<&(dyn Fn(&UserToken) -> bool + Sync)>,
    ) -> AuthResult<Vec<(UserToken, Option<String>)>> {
        match self.repository.index_state().await {
            IndexState::Missing => return Ok(Vec::new()),
            IndexState::Unavailable => {
                return Err(AuthError::Store(
                    spindrift_store::StoreError::shard_unavailable(
                        "security index is not available",
                    ),
                ));
            }
            IndexState::Available => {}
        }
        let now = self.now();
        let response = self.repository.search_tokens(query).await?;
        if response.timed_out {
            return Err(AuthError::Store(spindrift_store::StoreError::timeout(
                "active token search timed out",
            )));
        }
        let mut tokens = Vec::new();
        for hit in &response.hits {
            let document = TokenDocument::from_source(&hit.source)?;
            if !is_active(&document, now) {
                continue;
            }
            let user_token = document.access_token.user_token;
            if let Some(filter) = filter {
                if !filter(&user_token) {
                    continue;
                }
            }
            let refresh = document.refresh_token.map(|rt| rt.token);
            tokens.push((user_token, refresh));
        }
        Ok(tokens)
    }

    // =========================================================================
    // Key management
    // =========================================================================

    /// Runs a full key rotation from the elected leader: publish a spare
    /// key, and once that is acknowledged, publish it as the new active
    /// key.
    ///
    /// # Errors
    ///
    /// Fails when the local node is not the leader or a submission is not
    /// acknowledged.
    pub async fn rotate_keys_on_leader(&self) -> AuthResult<()> {
        if !self.cluster.state().local_node_is_leader {
            return Err(AuthError::invalid_request(
                "key rotation is initiated by the elected leader",
            ));
        }
        tracing::info!("rotating token keys on leader");
        let spare = self.keys.generate_spare_key();
        let ack = self
            .cluster
            .submit_token_keys(spare.clone(), Priority::Urgent)
            .await?;
        if !ack.acknowledged {
            return Err(AuthError::Cluster(
                spindrift_cluster::ClusterError::NotAcknowledged,
            ));
        }
        // The published payload also arrives through the watch task, but
        // rotation must see the spare installed before naming it active.
        self.keys.refresh_metadata(&spare)?;
        let rotated = self.keys.rotate_to_spare_key()?;
        let ack = self
            .cluster
            .submit_token_keys(rotated.clone(), Priority::Urgent)
            .await?;
        if !ack.acknowledged {
            return Err(AuthError::Cluster(
                spindrift_cluster::ClusterError::NotAcknowledged,
            ));
        }
        self.keys.refresh_metadata(&rotated)?;
        Ok(())
    }

    /// Returns metadata keeping only the `keep` newest keys (the active
    /// key is always kept). The result must be published and observed
    /// before it takes effect.
    #[must_use]
    pub fn prune_keys(&self, keep: usize) -> TokenKeysMetadata {
        self.keys.prune_keys(keep)
    }

    /// The metadata describing the current key ring.
    #[must_use]
    pub fn token_metadata(&self) -> TokenKeysMetadata {
        self.keys.token_metadata()
    }

    /// Rebuilds the key ring from a metadata payload. Invoked for every
    /// observed change of the cluster metadata slot; exposed for callers
    /// that apply a payload they published themselves.
    ///
    /// # Errors
    ///
    /// Fails when the payload's active key is not among its keys.
    pub fn refresh_token_keys(&self, metadata: &TokenKeysMetadata) -> AuthResult<()> {
        self.keys.refresh_metadata(metadata)
    }

    /// The active key's hash in URL-safe textual form.
    #[must_use]
    pub fn active_key_hash(&self) -> String {
        self.keys.active_key_hash_string()
    }

    // =========================================================================
    // Cluster wiring
    // =========================================================================

    /// Spawns the task that reacts to cluster state changes: installing
    /// the initial token metadata from the leader and rebuilding the key
    /// ring when the metadata slot changes.
    pub fn spawn_cluster_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut watcher = service.cluster.watch();
        tokio::spawn(async move {
            loop {
                let state = watcher.borrow_and_update().clone();
                service.handle_cluster_state(&state).await;
                if watcher.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Processes one observed cluster state.
    pub async fn handle_cluster_state(&self, state: &ClusterState) {
        if state.local_node_is_leader && state.token_keys.is_none() {
            self.install_token_metadata().await;
        }
        if let Some(metadata) = &state.token_keys {
            if *metadata != self.keys.token_metadata() {
                tracing::info!("refreshing token keys");
                if let Err(e) = self.keys.refresh_metadata(metadata) {
                    tracing::warn!(error = %e, "refreshing token keys metadata failed");
                }
            }
        }
    }

    /// Installs this node's metadata into the empty cluster slot, once.
    async fn install_token_metadata(&self) {
        if self
            .install_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let metadata = self.keys.token_metadata();
        if let Err(e) = self
            .cluster
            .submit_token_keys(metadata, Priority::Urgent)
            .await
        {
            tracing::error!(error = %e, "unable to install token metadata");
        }
        self.install_in_progress.store(false, Ordering::SeqCst);
    }

    // =========================================================================
    // Sweeper trigger
    // =========================================================================

    /// Submits the expired-token sweeper if more than the delete interval
    /// has passed since the last submission and the index is available.
    pub(crate) async fn maybe_start_expired_sweeper(&self) {
        if self.repository.index_state().await != IndexState::Available {
            return;
        }
        let now_ms = millis::to_millis(self.now());
        let last = self.last_sweep_ms.load(Ordering::SeqCst);
        if now_ms - last > self.config.delete_interval.as_millis() as i64 {
            self.sweeper.submit(self.config.delete_timeout);
            self.last_sweep_ms.store(now_ms, Ordering::SeqCst);
        }
    }
}

/// A token pair is active while its access token is live or its refresh
/// token can still be exchanged.
fn is_active(document: &TokenDocument, now: time::OffsetDateTime) -> bool {
    let access_live = !document.access_token.invalidated
        && now <= document.access_token.user_token.expiration_time;
    let refresh_live = document.refresh_token.as_ref().is_some_and(|rt| {
        !rt.invalidated && now <= document.creation_time + REFRESH_TOKEN_CEILING
    });
    access_live || refresh_live
}
