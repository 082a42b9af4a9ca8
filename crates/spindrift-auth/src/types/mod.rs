//! Domain types for the token service.

pub mod document;
pub mod invalidation;
pub mod user_token;

pub use document::{
    AccessTokenDoc, ClientInfo, RefreshTokenDoc, TOKEN_DOC_ID_PREFIX, TOKEN_DOC_TYPE,
    TokenDocument, token_doc_id, token_id_from_doc_id,
};
pub use invalidation::TokensInvalidationResult;
pub use user_token::UserToken;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How an authentication was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationType {
    /// Authenticated directly against a realm (password, PKI, ...).
    Realm,
    /// Authenticated by presenting an access token.
    Token,
    /// Internal cluster traffic.
    Internal,
}

/// An authenticated caller: the effective user, the realm that
/// authenticated them, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    /// Principal name of the authenticated user.
    pub username: String,
    /// Name of the realm that authenticated the user.
    pub realm: String,
    /// How the authentication was established.
    pub auth_type: AuthenticationType,
    /// Realm-specific metadata attached to the authentication.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Authentication {
    /// Creates a realm authentication with no metadata.
    #[must_use]
    pub fn realm(username: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            realm: realm.into(),
            auth_type: AuthenticationType::Realm,
            metadata: Map::new(),
        }
    }

    /// Returns a copy of this authentication retagged as token-based.
    ///
    /// Tokens minted from an existing authentication carry the same user
    /// and realm but record that the credential presented was a token.
    #[must_use]
    pub fn retagged_as_token(&self) -> Self {
        Self {
            auth_type: AuthenticationType::Token,
            ..self.clone()
        }
    }
}

/// Serde helpers for timestamps persisted as milliseconds since epoch.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn to_millis(t: OffsetDateTime) -> i64 {
        (t.unix_timestamp_nanos() / 1_000_000) as i64
    }

    pub fn from_millis(ms: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
    }

    pub fn serialize<S: Serializer>(t: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(to_millis(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        from_millis(ms).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for optional millisecond timestamps.
pub(crate) mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    use super::millis;

    pub fn serialize<S: Serializer>(
        t: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => serializer.serialize_some(&millis::to_millis(*t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        let ms = Option::<i64>::deserialize(deserializer)?;
        ms.map(millis::from_millis)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retagging_preserves_identity() {
        let auth = Authentication::realm("alice", "r1");
        let token_auth = auth.retagged_as_token();
        assert_eq!(token_auth.username, "alice");
        assert_eq!(token_auth.realm, "r1");
        assert_eq!(token_auth.auth_type, AuthenticationType::Token);
    }

    #[test]
    fn millis_round_trip() {
        let t = millis::from_millis(1_700_000_123_456).unwrap();
        assert_eq!(millis::to_millis(t), 1_700_000_123_456);
    }
}
