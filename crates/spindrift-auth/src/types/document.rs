//! Token document shapes.
//!
//! A token document is the single persisted record behind an access/refresh
//! token pair. Bearer strings and refresh strings never appear in any other
//! document, and the access token itself is never stored; the document is
//! looked up by the random id carried inside the bearer string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::types::UserToken;

/// Value of the `doc_type` field on token documents.
pub const TOKEN_DOC_TYPE: &str = "token";

/// Prefix of every token document id.
pub const TOKEN_DOC_ID_PREFIX: &str = "token_";

/// Builds the document id for a token id.
#[must_use]
pub fn token_doc_id(token_id: &str) -> String {
    format!("{TOKEN_DOC_ID_PREFIX}{token_id}")
}

/// Extracts the token id from a document id.
///
/// # Errors
///
/// A document id without the `token_` prefix can only come from a
/// corrupted index or a foreign document and is reported as a fatal
/// inconsistency.
pub fn token_id_from_doc_id(doc_id: &str) -> Result<&str, AuthError> {
    doc_id.strip_prefix(TOKEN_DOC_ID_PREFIX).ok_or_else(|| {
        AuthError::inconsistency(format!("token document id [{doc_id}] has unexpected value"))
    })
}

/// The client a refresh token is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Kind of client; currently always `"unassociated_client"`.
    #[serde(rename = "type")]
    pub client_type: String,
    /// Principal that created the token pair.
    pub user: String,
    /// Realm that authenticated that principal.
    pub realm: String,
}

/// The persisted state of a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenDoc {
    /// The opaque refresh string handed to the client.
    pub token: String,
    /// Whether the refresh token has been invalidated.
    pub invalidated: bool,
    /// Whether the refresh token has been used.
    pub refreshed: bool,
    /// When the refresh happened, if it has.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::types::millis_opt"
    )]
    pub refresh_time: Option<OffsetDateTime>,
    /// Document id of the token pair minted by the refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// The client allowed to use this refresh token.
    pub client: ClientInfo,
}

/// The persisted state of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenDoc {
    /// Whether the access token has been invalidated.
    pub invalidated: bool,
    /// Realm the token was issued against.
    pub realm: String,
    /// The reconstructable in-memory token.
    pub user_token: UserToken,
}

/// A complete token document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDocument {
    /// Constant tag used for filtering searches.
    pub doc_type: String,
    /// Creation instant; refresh tokens die 24 h after this,
    /// unconditionally.
    #[serde(with = "crate::types::millis")]
    pub creation_time: OffsetDateTime,
    /// Access-token state.
    pub access_token: AccessTokenDoc,
    /// Refresh-token state, when a refresh token was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshTokenDoc>,
}

impl TokenDocument {
    /// Parses a document source fetched from the index.
    ///
    /// # Errors
    ///
    /// Every missing mandatory field or type mismatch surfaces as
    /// [`AuthError::MalformedDocument`] naming the problem.
    pub fn from_source(source: &Value) -> Result<Self, AuthError> {
        serde_json::from_value(source.clone())
            .map_err(|e| AuthError::malformed_document(e.to_string()))
    }

    /// Serializes the document for indexing.
    ///
    /// # Errors
    ///
    /// Serialization of a well-formed document cannot fail; an error here
    /// is reported as an internal inconsistency.
    pub fn to_source(&self) -> Result<Value, AuthError> {
        serde_json::to_value(self).map_err(|e| AuthError::inconsistency(e.to_string()))
    }

    /// The refresh-token state, or a malformed-document error when the
    /// document was created without one.
    pub fn require_refresh_token(&self) -> Result<&RefreshTokenDoc, AuthError> {
        self.refresh_token.as_ref().ok_or_else(|| {
            AuthError::malformed_document("token document is missing the refresh_token object")
        })
    }
}
