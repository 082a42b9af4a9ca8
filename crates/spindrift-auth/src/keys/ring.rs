//! The immutable key ring.

use std::collections::HashMap;
use std::sync::Arc;

use spindrift_core::SecureString;

use crate::error::AuthError;
use crate::keys::bytes_key::{KeyHash, Salt};
use crate::keys::cache::{KeyAndCache, KeyAndTimestamp};

/// Number of random bytes behind a generated passphrase.
pub const PASSPHRASE_BYTES: usize = 64;

/// An immutable snapshot of every key this node knows, plus which one is
/// active.
///
/// Rings are never mutated: the key manager builds a new ring and swaps
/// it in whole, so a reader holds either the old or the new snapshot and
/// never locks.
pub struct KeyRing {
    keys: HashMap<KeyHash, Arc<KeyAndCache>>,
    active_key_hash: KeyHash,
    active: Arc<KeyAndCache>,
}

impl KeyRing {
    /// Builds a ring from entries and the active key's hash.
    ///
    /// # Errors
    ///
    /// The active hash naming a key that is not in the map can only come
    /// from corrupted metadata and is a fatal inconsistency.
    pub fn new(
        keys: HashMap<KeyHash, Arc<KeyAndCache>>,
        active_key_hash: KeyHash,
    ) -> Result<Self, AuthError> {
        let active = keys.get(&active_key_hash).cloned().ok_or_else(|| {
            AuthError::inconsistency(format!(
                "active key [{active_key_hash}] is not present in the key ring"
            ))
        })?;
        Ok(Self {
            keys,
            active_key_hash,
            active,
        })
    }

    /// Builds the startup ring holding one fresh ephemeral key with the
    /// given generation counter.
    #[must_use]
    pub fn bootstrap(timestamp: i64) -> Self {
        let entry = Arc::new(KeyAndCache::new(
            KeyAndTimestamp::new(SecureString::generate(PASSPHRASE_BYTES), timestamp),
            Salt::random(),
        ));
        let active_key_hash = *entry.key_hash();
        let mut keys = HashMap::new();
        keys.insert(active_key_hash, entry.clone());
        Self {
            keys,
            active_key_hash,
            active: entry,
        }
    }

    /// Looks a key up by its hash.
    #[must_use]
    pub fn get(&self, hash: &KeyHash) -> Option<&Arc<KeyAndCache>> {
        self.keys.get(hash)
    }

    /// The currently-active key entry.
    #[must_use]
    pub fn active(&self) -> &Arc<KeyAndCache> {
        &self.active
    }

    /// The hash of the currently-active key.
    #[must_use]
    pub fn active_key_hash(&self) -> &KeyHash {
        &self.active_key_hash
    }

    /// Iterates over all entries.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<KeyAndCache>> {
        self.keys.values()
    }

    /// The entry with the largest generation counter.
    #[must_use]
    pub fn newest(&self) -> &Arc<KeyAndCache> {
        self.keys
            .values()
            .max_by_key(|entry| entry.key_and_timestamp().timestamp())
            .expect("a key ring is never empty")
    }

    /// Number of keys in the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// A ring always holds at least the active key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
