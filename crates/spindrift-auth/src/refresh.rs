//! The refresh state machine.
//!
//! A refresh exchanges a refresh string for a new token pair. The
//! protocol must stay idempotent under duplicate and racing requests
//! against a replicated store, which shapes the four stages:
//!
//! 1. **locate** the single document holding the refresh string;
//! 2. **inspect** it: 24 h ceiling, invalidation, client binding;
//! 3. **idempotence check**: a document already refreshed within the
//!    last 30 seconds replays the winner's result instead of failing, so
//!    near-simultaneous refreshes converge on one superseding pair;
//! 4. **mint**: conditionally mark the original refreshed (gated on the
//!    revision read in stage 1) and create the superseding document. A
//!    version conflict means another refresh won; re-read and go back to
//!    stage 3.
//!
//! One backoff iterator is threaded through all stages, bounding the
//! total retries of a single refresh call.

use serde_json::json;
use time::OffsetDateTime;

use spindrift_core::{NodeVersion, random_token_id};
use spindrift_store::{BackoffIter, StoredDocument, WriteOutcome};

use crate::AuthResult;
use crate::error::AuthError;
use crate::service::{REFRESH_TOKEN_CEILING, TokenService};
use crate::types::millis;
use crate::types::{Authentication, TokenDocument, UserToken, token_doc_id};

/// Window around a recorded refresh instant inside which a duplicate
/// refresh replays the original result.
pub(crate) const REFRESH_REPLAY_WINDOW: time::Duration = time::Duration::seconds(30);

/// What to do with a refreshable document.
#[derive(Debug)]
enum RefreshDecision {
    /// Mint a new token pair.
    Mint,
    /// The document was already refreshed moments ago; return the pair
    /// from the superseding document.
    Replay {
        /// Document id recorded in `superseded_by`.
        superseding_doc_id: String,
    },
}

impl TokenService {
    /// Exchanges a refresh string for a new `(token, refresh string)`
    /// pair.
    ///
    /// # Errors
    ///
    /// Refusals (unknown refresh token, wrong client, expired document,
    /// replay outside the window, retries exhausted) surface as
    /// [`AuthError::InvalidGrant`].
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client_auth: Authentication,
    ) -> AuthResult<(UserToken, String)> {
        self.ensure_enabled()?;
        let mut backoff = self.backoff.iter();
        let doc = self
            .repository
            .find_token_by_refresh_token(refresh_token, &mut backoff)
            .await?;
        self.inner_refresh(doc, client_auth, &mut backoff).await
    }

    async fn inner_refresh(
        &self,
        mut doc: StoredDocument,
        client_auth: Authentication,
        backoff: &mut BackoffIter,
    ) -> AuthResult<(UserToken, String)> {
        let could_not_refresh =
            || AuthError::invalid_grant("could not refresh the requested token");
        loop {
            tracing::debug!(doc_id = %doc.id, "attempting to refresh token document");
            let document = TokenDocument::from_source(&doc.source)?;
            match check_token_document_for_refresh(self.now(), &client_auth, &document)? {
                RefreshDecision::Replay { superseding_doc_id } => {
                    tracing::debug!(
                        doc_id = %doc.id,
                        superseding = %superseding_doc_id,
                        "token document was recently refreshed, reusing that result"
                    );
                    return self
                        .load_superseding_tokens(&superseding_doc_id, backoff)
                        .await;
                }
                RefreshDecision::Mint => {}
            }

            let new_token_id = random_token_id();
            let partial = json!({
                "refresh_token": {
                    "refreshed": true,
                    "refresh_time": millis::to_millis(self.now()),
                    "superseded_by": token_doc_id(&new_token_id),
                }
            });
            let update = self
                .repository
                .conditional_update(&doc.id, partial, doc.seq_no, doc.primary_term)
                .await;
            match update {
                Ok(WriteOutcome::Updated) => {
                    tracing::debug!(doc_id = %doc.id, "updated the original token document");
                    let original = document.access_token.user_token;
                    let (token, refresh) = self
                        .create_oauth2_tokens_with_id(
                            new_token_id,
                            original.authentication,
                            client_auth,
                            original.metadata,
                            true,
                        )
                        .await?;
                    let refresh =
                        refresh.expect("refresh token was requested for the superseding pair");
                    return Ok((token, refresh));
                }
                Ok(outcome) => match backoff.next() {
                    // The update did not land (e.g. a no-op); nothing
                    // observable changed, so the whole attempt repeats.
                    Some(delay) => {
                        tracing::info!(
                            doc_id = %doc.id,
                            ?outcome,
                            "failed to update the original token document, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::info!(
                            doc_id = %doc.id,
                            ?outcome,
                            "failed to update the original token document after all retries"
                        );
                        return Err(could_not_refresh());
                    }
                },
                Err(e) if e.is_version_conflict() => {
                    // Another refresh moved the document first; decide
                    // against the winner's revision.
                    tracing::debug!(doc_id = %doc.id, "version conflict while updating, re-reading");
                    match self.repository.get_document_retrying(&doc.id, backoff).await {
                        Ok(Some(latest)) => doc = latest,
                        Ok(None) => {
                            tracing::warn!(doc_id = %doc.id, "token document gone during refresh");
                            return Err(could_not_refresh());
                        }
                        Err(_) => return Err(could_not_refresh()),
                    }
                }
                Err(e) if e.is_shard_unavailable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(doc_id = %doc.id, "failed to update the original token document, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(doc_id = %doc.id, "failed to update the original token document after all retries");
                        return Err(could_not_refresh());
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fetches and parses the superseding document minted by a completed
    /// refresh. The creating write may still be in flight, so a missing
    /// document is retried.
    async fn load_superseding_tokens(
        &self,
        doc_id: &str,
        backoff: &mut BackoffIter,
    ) -> AuthResult<(UserToken, String)> {
        let could_not_refresh =
            || AuthError::invalid_grant("could not refresh the requested token");
        loop {
            match self.repository.get_document(doc_id).await {
                Ok(Some(doc)) => {
                    let document = TokenDocument::from_source(&doc.source)?;
                    return parse_tokens_from_document(&document);
                }
                Ok(None) => match backoff.next() {
                    Some(delay) => {
                        tracing::info!(
                            superseding = doc_id,
                            "superseding token document not yet visible, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(superseding = doc_id, "back off retries exhausted");
                        return Err(could_not_refresh());
                    }
                },
                Err(e) if e.is_shard_unavailable() => match backoff.next() {
                    Some(delay) => {
                        tracing::info!(
                            superseding = doc_id,
                            "could not load superseding token document, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(could_not_refresh()),
                },
                Err(_) => return Err(could_not_refresh()),
            }
        }
    }
}

/// Runs the inspect and idempotence stages against a parsed document.
fn check_token_document_for_refresh(
    now: OffsetDateTime,
    client_auth: &Authentication,
    document: &TokenDocument,
) -> AuthResult<RefreshDecision> {
    let refresh = document.require_refresh_token()?;
    if now > document.creation_time + REFRESH_TOKEN_CEILING {
        return Err(AuthError::invalid_grant("token document has expired"));
    }
    if refresh.invalidated {
        return Err(AuthError::invalid_grant("token has been invalidated"));
    }
    if client_auth.username != refresh.client.user {
        tracing::warn!(
            creator = %refresh.client.user,
            caller = %client_auth.username,
            "refresh attempted by a different principal than the creating client"
        );
        return Err(AuthError::invalid_grant(
            "tokens must be refreshed by the creating client",
        ));
    }
    if client_auth.realm != refresh.client.realm {
        tracing::warn!(
            creator_realm = %refresh.client.realm,
            caller_realm = %client_auth.realm,
            "refresh attempted from a different realm than the creating client"
        );
        return Err(AuthError::invalid_grant(
            "tokens must be refreshed by the creating client",
        ));
    }
    if !refresh.refreshed {
        return Ok(RefreshDecision::Mint);
    }
    if !document
        .access_token
        .user_token
        .version
        .on_or_after(NodeVersion::V7_1_0)
    {
        return Err(AuthError::invalid_grant("token has already been refreshed"));
    }
    let refresh_time = refresh.refresh_time.ok_or_else(|| {
        AuthError::malformed_document("refreshed token document is missing the refresh_time field")
    })?;
    if now > refresh_time + REFRESH_REPLAY_WINDOW {
        return Err(AuthError::invalid_grant(
            "token has already been refreshed more than 30 seconds in the past",
        ));
    }
    // A refresh recorded well ahead of our clock means the writer's and
    // our clocks disagree by more than the window allows.
    if now < refresh_time - REFRESH_REPLAY_WINDOW {
        return Err(AuthError::invalid_grant(
            "token has been refreshed more than 30 seconds in the future, clock skew too great",
        ));
    }
    let superseding_doc_id = refresh.superseded_by.clone().ok_or_else(|| {
        AuthError::malformed_document(
            "refreshed token document is missing the superseded_by field",
        )
    })?;
    Ok(RefreshDecision::Replay { superseding_doc_id })
}

/// Extracts the `(token, refresh string)` pair from a token document.
fn parse_tokens_from_document(document: &TokenDocument) -> AuthResult<(UserToken, String)> {
    let refresh = document.require_refresh_token()?;
    Ok((
        document.access_token.user_token.clone(),
        refresh.token.clone(),
    ))
}
