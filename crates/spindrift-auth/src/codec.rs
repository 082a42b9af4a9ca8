//! Bearer string encoding and decoding.
//!
//! The wire layout starts with a 4-byte version word and then depends on
//! the version of the node that minted the token:
//!
//! - on or after 7.1.0: a length-prefixed UTF-8 token id. The token is
//!   opaque because the id names a random document, not because it is
//!   encrypted.
//! - before 7.1.0: `salt[32] || key_hash[8] || iv[12] || AES-128-GCM(id)`,
//!   where the GCM associated data is the version word concatenated with
//!   the salt and the key is derived from the hashed passphrase.
//!
//! The whole payload is standard (padded) base64 on the wire.
//!
//! Decoding is deliberately forgiving: any failure - short payload,
//! unknown key hash, tag mismatch - yields "no token", because the bearer
//! may belong to another authenticator entirely.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;

use spindrift_core::NodeVersion;

use crate::error::AuthError;
use crate::keys::{KeyDerivationExecutor, KeyRing, Salt};
use crate::types::UserToken;

/// Width of the version word in bytes.
pub const VERSION_BYTES: usize = 4;

/// Width of the GCM initialization vector in bytes.
pub const IV_BYTES: usize = 12;

/// Width of a key hash on the wire in bytes.
const KEY_HASH_BYTES: usize = 8;

/// Smallest well-formed legacy payload before base64: version word, salt,
/// key hash, IV, and at least one ciphertext byte.
pub const MINIMUM_BYTES: usize = VERSION_BYTES + Salt::LENGTH + KEY_HASH_BYTES + IV_BYTES + 1;

/// Encodes and decodes bearer strings against a key ring.
pub struct TokenCodec {
    derivation: KeyDerivationExecutor,
}

impl TokenCodec {
    /// Creates a codec that funnels key derivation through `executor`.
    #[must_use]
    pub fn new(executor: KeyDerivationExecutor) -> Self {
        Self {
            derivation: executor,
        }
    }

    /// Serializes a token to its opaque bearer string.
    ///
    /// The format is chosen by the cluster's minimum node version so that
    /// every node can read the result; the payload records the token's own
    /// version.
    ///
    /// # Errors
    ///
    /// Fails only on internal conditions (derivation executor gone,
    /// cipher failure); never because of caller input.
    pub async fn encode(
        &self,
        user_token: &UserToken,
        ring: &KeyRing,
        min_node_version: NodeVersion,
    ) -> Result<String, AuthError> {
        let version_word = user_token.version.to_id().to_be_bytes();
        let mut out = Vec::with_capacity(MINIMUM_BYTES + user_token.id.len());
        out.extend_from_slice(&version_word);
        if min_node_version.on_or_after(NodeVersion::V7_1_0) {
            write_prefixed_string(&mut out, &user_token.id);
        } else {
            let entry = Arc::clone(ring.active());
            let key = self
                .derivation
                .derive(entry.clone(), entry.salt().clone())
                .await
                .ok_or_else(|| {
                    AuthError::inconsistency("key derivation executor is shut down")
                })?;
            let mut iv = [0u8; IV_BYTES];
            OsRng.fill_bytes(&mut iv);

            let mut plaintext = Vec::with_capacity(4 + user_token.id.len());
            write_prefixed_string(&mut plaintext, &user_token.id);
            let mut aad = Vec::with_capacity(VERSION_BYTES + Salt::LENGTH);
            aad.extend_from_slice(&version_word);
            aad.extend_from_slice(entry.salt().as_bytes());

            let cipher = Aes128Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| AuthError::inconsistency(format!("cipher setup failed: {e}")))?;
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&iv),
                    Payload {
                        msg: &plaintext,
                        aad: &aad,
                    },
                )
                .map_err(|_| AuthError::inconsistency("token encryption failed"))?;

            out.extend_from_slice(entry.salt().as_bytes());
            out.extend_from_slice(entry.key_hash().as_bytes());
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ciphertext);
        }
        Ok(STANDARD.encode(out))
    }

    /// Extracts the token id from a bearer string.
    ///
    /// Returns `None` for anything that is not one of our tokens; the
    /// caller treats that as unauthenticated rather than as an error.
    pub async fn decode(&self, bearer: &str, ring: &KeyRing) -> Option<String> {
        let bytes = STANDARD.decode(bearer).ok()?;
        if bytes.len() < VERSION_BYTES {
            return None;
        }
        let version_id = u32::from_be_bytes(bytes[..VERSION_BYTES].try_into().ok()?);
        let version = NodeVersion::from_id(version_id).ok()?;
        let rest = &bytes[VERSION_BYTES..];
        if version.on_or_after(NodeVersion::V7_1_0) {
            return read_prefixed_string(rest);
        }
        if bytes.len() < MINIMUM_BYTES {
            tracing::debug!(len = bytes.len(), "bearer payload smaller than minimum");
            return None;
        }
        let (salt_bytes, rest) = rest.split_at(Salt::LENGTH);
        let (hash_bytes, rest) = rest.split_at(KEY_HASH_BYTES);
        let (iv, ciphertext) = rest.split_at(IV_BYTES);
        let salt = Salt::from_slice(salt_bytes)?;
        let key_hash = crate::keys::KeyHash::from_slice(hash_bytes)?;

        let Some(entry) = ring.get(&key_hash) else {
            tracing::debug!(key = %key_hash, "bearer names an unknown key");
            return None;
        };
        let key = self.derivation.derive(Arc::clone(entry), salt.clone()).await?;

        let mut aad = Vec::with_capacity(VERSION_BYTES + Salt::LENGTH);
        aad.extend_from_slice(&bytes[..VERSION_BYTES]);
        aad.extend_from_slice(salt.as_bytes());

        let cipher = Aes128Gcm::new_from_slice(key.as_bytes()).ok()?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .ok()?;
        read_prefixed_string(&plaintext)
    }
}

fn write_prefixed_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn read_prefixed_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(bytes[..4].try_into().ok()?) as usize;
    let value = bytes.get(4..4 + len)?;
    String::from_utf8(value.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use spindrift_core::random_token_id;
    use time::OffsetDateTime;

    use crate::types::Authentication;

    fn codec() -> TokenCodec {
        TokenCodec::new(KeyDerivationExecutor::new("test-token-key"))
    }

    fn user_token(version: NodeVersion) -> UserToken {
        UserToken {
            id: random_token_id(),
            version,
            authentication: Authentication::realm("alice", "r1").retagged_as_token(),
            expiration_time: OffsetDateTime::from_unix_timestamp(1_700_001_200).unwrap(),
            metadata: Map::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn modern_round_trip() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::V7_1_0);

        let bearer = codec
            .encode(&token, &ring, NodeVersion::V7_1_0)
            .await
            .unwrap();
        let decoded = codec.decode(&bearer, &ring).await.unwrap();
        assert_eq!(decoded, token.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn legacy_round_trip() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::new(7, 0, 0));

        let bearer = codec
            .encode(&token, &ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();
        let decoded = codec.decode(&bearer, &ring).await.unwrap();
        assert_eq!(decoded, token.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn legacy_bearer_does_not_leak_the_id() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::new(7, 0, 0));

        let bearer = codec
            .encode(&token, &ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();
        let payload = STANDARD.decode(&bearer).unwrap();
        let id_bytes = token.id.as_bytes();
        let leaked = payload
            .windows(id_bytes.len())
            .any(|window| window == id_bytes);
        assert!(!leaked, "token id must not appear in the ciphertext");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn legacy_encodings_differ_across_ivs() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::new(7, 0, 0));

        let a = codec
            .encode(&token, &ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();
        let b = codec
            .encode(&token, &ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_key_yields_no_token() {
        let codec = codec();
        let mint_ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::new(7, 0, 0));
        let bearer = codec
            .encode(&token, &mint_ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();

        // A ring that never saw the minting key cannot decode the bearer.
        let other_ring = KeyRing::bootstrap(0);
        assert!(codec.decode(&bearer, &other_ring).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tampered_ciphertext_yields_no_token() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        let token = user_token(NodeVersion::new(7, 0, 0));
        let bearer = codec
            .encode(&token, &ring, NodeVersion::new(7, 0, 0))
            .await
            .unwrap();

        let mut payload = STANDARD.decode(&bearer).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        let tampered = STANDARD.encode(payload);
        assert!(codec.decode(&tampered, &ring).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbage_yields_no_token() {
        let codec = codec();
        let ring = KeyRing::bootstrap(0);
        assert!(codec.decode("not-base64!!!", &ring).await.is_none());
        assert!(codec.decode("", &ring).await.is_none());
        assert!(
            codec
                .decode(&STANDARD.encode([0u8; 3]), &ring)
                .await
                .is_none()
        );
        // A valid version word followed by a truncated legacy payload.
        let mut short = NodeVersion::new(7, 0, 0).to_id().to_be_bytes().to_vec();
        short.extend_from_slice(&[0u8; 10]);
        assert!(codec.decode(&STANDARD.encode(short), &ring).await.is_none());
    }
}
