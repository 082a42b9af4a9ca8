//! The invalidation engine.
//!
//! Invalidation flips the `invalidated` flag on access and/or refresh
//! token state in bulk, accumulating partial failures: each attempt
//! partitions the bulk response into newly invalidated, previously
//! invalidated, retryable (shard-unavailable) and failed items, then
//! retries only the retryable subset against the shared backoff budget,
//! folding results across attempts.
//!
//! When both halves of a pair are invalidated, refresh tokens go first so
//! that a racing refresh cannot mint a replacement for an access token
//! that is about to die.

use spindrift_store::{BackoffIter, StoreError, WriteOutcome};

use crate::AuthResult;
use crate::error::AuthError;
use crate::service::TokenService;
use crate::types::{
    TokensInvalidationResult, UserToken, token_doc_id, token_id_from_doc_id,
};

/// Which half of a token pair a bulk invalidation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvalidationTarget {
    /// Set `access_token.invalidated`.
    AccessToken,
    /// Set `refresh_token.invalidated`.
    RefreshToken,
}

impl InvalidationTarget {
    fn prefix(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl TokenService {
    /// Invalidates the access token presented as a bearer string.
    ///
    /// # Errors
    ///
    /// A bearer that does not decode to one of our tokens fails as
    /// malformed.
    pub async fn invalidate_access_token(
        &self,
        bearer: &str,
    ) -> AuthResult<TokensInvalidationResult> {
        self.ensure_enabled()?;
        if bearer.is_empty() {
            return Err(AuthError::invalid_request("access token must be provided"));
        }
        self.maybe_start_expired_sweeper().await;
        let mut backoff = self.backoff.iter();
        let ring = self.keys.ring();
        let Some(token_id) = self.codec.decode(bearer, &ring).await else {
            return Err(AuthError::MalformedToken);
        };
        self.index_invalidation(
            vec![token_id],
            &mut backoff,
            InvalidationTarget::AccessToken,
            TokensInvalidationResult::empty(),
        )
        .await
    }

    /// Invalidates an already-decoded access token.
    pub async fn invalidate_user_token(
        &self,
        user_token: &UserToken,
    ) -> AuthResult<TokensInvalidationResult> {
        self.ensure_enabled()?;
        self.maybe_start_expired_sweeper().await;
        let mut backoff = self.backoff.iter();
        self.index_invalidation(
            vec![user_token.id.clone()],
            &mut backoff,
            InvalidationTarget::AccessToken,
            TokensInvalidationResult::empty(),
        )
        .await
    }

    /// Invalidates a refresh token given its opaque string.
    ///
    /// # Errors
    ///
    /// An unknown refresh string fails as an invalid grant.
    pub async fn invalidate_refresh_token(
        &self,
        refresh_token: &str,
    ) -> AuthResult<TokensInvalidationResult> {
        self.ensure_enabled()?;
        if refresh_token.is_empty() {
            return Err(AuthError::invalid_request("refresh token must be provided"));
        }
        self.maybe_start_expired_sweeper().await;
        let mut backoff = self.backoff.iter();
        let doc = self
            .repository
            .find_token_by_refresh_token(refresh_token, &mut backoff)
            .await?;
        let token_id = token_id_from_doc_id(&doc.id)?.to_string();
        self.index_invalidation(
            vec![token_id],
            &mut backoff,
            InvalidationTarget::RefreshToken,
            TokensInvalidationResult::empty(),
        )
        .await
    }

    /// Invalidates every active token issued against a realm and/or for a
    /// user; both halves of each pair are invalidated.
    ///
    /// # Errors
    ///
    /// At least one of `realm_name` and `username` must be provided.
    pub async fn invalidate_active_tokens_for_realm_and_user(
        &self,
        realm_name: Option<&str>,
        username: Option<&str>,
    ) -> AuthResult<TokensInvalidationResult> {
        self.ensure_enabled()?;
        let realm_name = realm_name.filter(|name| !name.is_empty());
        let username = username.filter(|name| !name.is_empty());
        let tokens = match (realm_name, username) {
            (None, None) => {
                return Err(AuthError::invalid_request(
                    "realm name or username must be provided",
                ));
            }
            (None, Some(user)) => self.find_active_tokens_for_user(user).await?,
            (Some(realm), None) => self.find_active_tokens_for_realm(realm, None).await?,
            (Some(realm), Some(user)) => {
                let filter = move |token: &UserToken| token.authentication.username == user;
                self.find_active_tokens_for_realm(realm, Some(&filter)).await?
            }
        };
        if tokens.is_empty() {
            tracing::warn!(
                realm = realm_name.unwrap_or_default(),
                username = username.unwrap_or_default(),
                "no tokens to invalidate"
            );
            return Ok(TokensInvalidationResult::empty());
        }
        let token_ids = tokens.into_iter().map(|(token, _)| token.id).collect();
        self.invalidate_all_tokens(token_ids).await
    }

    /// Invalidates the refresh tokens and then the access tokens of the
    /// given documents, folding both passes into one result.
    async fn invalidate_all_tokens(
        &self,
        token_ids: Vec<String>,
    ) -> AuthResult<TokensInvalidationResult> {
        self.maybe_start_expired_sweeper().await;
        let mut backoff = self.backoff.iter();
        // Refresh tokens first: once they are dead, a racing refresh can
        // no longer mint a replacement for the access tokens below.
        let refresh_result = self
            .index_invalidation(
                token_ids.clone(),
                &mut backoff,
                InvalidationTarget::RefreshToken,
                TokensInvalidationResult::empty(),
            )
            .await?;
        // The second pass folds the first pass's partial results into the
        // final aggregate.
        self.index_invalidation(
            token_ids,
            &mut backoff,
            InvalidationTarget::AccessToken,
            refresh_result,
        )
        .await
    }

    /// One bulk-invalidation pass with retry of the shard-unavailable
    /// subset.
    pub(crate) async fn index_invalidation(
        &self,
        mut token_ids: Vec<String>,
        backoff: &mut BackoffIter,
        target: InvalidationTarget,
        mut result: TokensInvalidationResult,
    ) -> AuthResult<TokensInvalidationResult> {
        if token_ids.is_empty() {
            tracing::warn!(target = target.prefix(), "no tokens provided for invalidation");
            return Err(AuthError::invalid_grant("no tokens provided for invalidation"));
        }
        loop {
            let doc_ids: Vec<String> = token_ids.iter().map(|id| token_doc_id(id)).collect();
            let response = self
                .repository
                .bulk_set_invalidated(&doc_ids, target.prefix())
                .await;
            match response {
                Ok(items) => {
                    let mut retry_ids = Vec::new();
                    for item in items {
                        match item.outcome {
                            Ok(WriteOutcome::Updated) => {
                                tracing::debug!(
                                    target = target.prefix(),
                                    doc_id = %item.doc_id,
                                    "invalidated token"
                                );
                                result.invalidated.push(item.doc_id);
                            }
                            Ok(WriteOutcome::Noop) => {
                                result.previously_invalidated.push(item.doc_id);
                            }
                            Ok(WriteOutcome::Created) => {
                                result.errors.push(AuthError::inconsistency(format!(
                                    "bulk invalidation created document [{}]",
                                    item.doc_id
                                )));
                            }
                            Err(cause) if cause.is_shard_unavailable() => {
                                retry_ids.push(token_id_from_doc_id(&item.doc_id)?.to_string());
                            }
                            Err(cause) => {
                                tracing::debug!(
                                    target = target.prefix(),
                                    doc_id = %item.doc_id,
                                    error = %cause,
                                    "failed to invalidate token"
                                );
                                result.errors.push(cause.into());
                            }
                        }
                    }
                    if retry_ids.is_empty() {
                        return Ok(result);
                    }
                    match backoff.next() {
                        Some(delay) => {
                            tracing::debug!(
                                failed = retry_ids.len(),
                                total = token_ids.len(),
                                "failed to invalidate some tokens, retrying those"
                            );
                            tokio::time::sleep(delay).await;
                            token_ids = retry_ids;
                        }
                        None => {
                            tracing::warn!(
                                failed = retry_ids.len(),
                                total = token_ids.len(),
                                "failed to invalidate tokens after all retries"
                            );
                            for token_id in retry_ids {
                                result.errors.push(
                                    StoreError::shard_unavailable(format!(
                                        "failed to invalidate [{}] with doc id [{}] after retries exhausted",
                                        target.prefix(),
                                        token_doc_id(&token_id)
                                    ))
                                    .into(),
                                );
                            }
                            return Ok(result);
                        }
                    }
                }
                Err(e) if e.is_shard_unavailable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!("failed to invalidate tokens, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}
