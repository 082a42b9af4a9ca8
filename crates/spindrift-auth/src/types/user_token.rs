//! The in-memory access token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use spindrift_core::NodeVersion;

use crate::types::Authentication;

/// An access token as reconstructed from its token document.
///
/// The bearer string a client presents only carries (directly or
/// encrypted) the `id`; everything else lives in the document keyed by
/// that id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserToken {
    /// Random 128-bit base64url identifier.
    pub id: String,
    /// Version of the cluster at creation time; decides the wire format.
    pub version: NodeVersion,
    /// The authentication this token acts as.
    pub authentication: Authentication,
    /// Instant after which the token no longer authenticates.
    #[serde(with = "crate::types::millis")]
    pub expiration_time: OffsetDateTime,
    /// Caller-supplied metadata carried across refreshes.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl UserToken {
    /// Returns `true` if `now` is past the expiration time.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expiration_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> UserToken {
        UserToken {
            id: "q2VNQDrFe0eQp3qvBHxPzQ".to_string(),
            version: NodeVersion::V7_1_0,
            authentication: Authentication::realm("alice", "r1"),
            expiration_time: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn expiry_is_strict() {
        let token = sample();
        assert!(!token.is_expired(token.expiration_time));
        assert!(token.is_expired(token.expiration_time + Duration::from_secs(1)));
    }

    #[test]
    fn serializes_expiration_as_millis() {
        let token = sample();
        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(value["expiration_time"], 1_700_000_000_000_i64);
        let back: UserToken = serde_json::from_value(value).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn missing_expiration_fails() {
        let result = serde_json::from_value::<UserToken>(serde_json::json!({
            "id": "abc",
            "version": 7_010_000,
            "authentication": {
                "username": "alice", "realm": "r1", "auth_type": "token"
            },
        }));
        assert!(result.is_err());
    }
}
