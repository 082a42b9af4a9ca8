//! The token-keys metadata slot.
//!
//! The replicated metadata carries every passphrase the cluster may still
//! need for decoding, tagged with the monotonically increasing timestamp it
//! was generated under, plus the hash of the currently-active key. Nodes
//! rebuild their key ring from this payload whenever it changes.

use spindrift_core::SecureString;

/// A passphrase and the generation counter it was created under.
///
/// Timestamps are not wall-clock times; they are a cluster-wide counter
/// that strictly increases with each generated key, which is what makes
/// "the newest key" well defined during rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWithTimestamp {
    /// The secret passphrase the encryption key is derived from.
    pub passphrase: SecureString,
    /// Generation counter of this key.
    pub timestamp: i64,
}

impl KeyWithTimestamp {
    /// Creates a new entry.
    #[must_use]
    pub fn new(passphrase: SecureString, timestamp: i64) -> Self {
        Self {
            passphrase,
            timestamp,
        }
    }
}

/// The token-keys payload installed in the cluster metadata slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenKeysMetadata {
    /// All keys the cluster may still need for decoding.
    pub keys: Vec<KeyWithTimestamp>,
    /// Hash identifying the currently-active key. Must name one of `keys`.
    pub active_key_hash: Vec<u8>,
}

impl TokenKeysMetadata {
    /// Creates a new payload.
    #[must_use]
    pub fn new(keys: Vec<KeyWithTimestamp>, active_key_hash: Vec<u8>) -> Self {
        Self {
            keys,
            active_key_hash,
        }
    }
}
