//! Key manager: generate, rotate, prune, and rebuild from metadata.
//!
//! The manager never mutates the published [`KeyRing`] in place. The
//! mutating operations each produce a [`TokenKeysMetadata`] payload for
//! the cluster-metadata channel; the ring only changes when
//! [`KeyManager::refresh_metadata`] applies an (acknowledged, observed)
//! payload, swapping in a whole new ring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use spindrift_cluster::{KeyWithTimestamp, TokenKeysMetadata};
use spindrift_core::SecureString;

use crate::error::AuthError;
use crate::keys::bytes_key::{KeyHash, Salt};
use crate::keys::cache::{KeyAndCache, KeyAndTimestamp};
use crate::keys::ring::{KeyRing, PASSPHRASE_BYTES};

/// Owns the key ring and the serialized operations that evolve it.
pub struct KeyManager {
    ring: RwLock<Arc<KeyRing>>,
    /// Strictly monotonically increasing generation counter for keys
    /// created in this process.
    created_timestamps: AtomicI64,
    /// Serializes generate/rotate/prune/refresh/metadata reads against
    /// each other.
    ops: Mutex<()>,
}

impl KeyManager {
    /// Creates a manager holding a single fresh ephemeral key.
    #[must_use]
    pub fn bootstrap() -> Self {
        let created_timestamps = AtomicI64::new(-1);
        let first = created_timestamps.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            ring: RwLock::new(Arc::new(KeyRing::bootstrap(first))),
            created_timestamps,
            ops: Mutex::new(()),
        }
    }

    /// The current ring snapshot. Readers never block writers beyond the
    /// instant of the pointer read.
    #[must_use]
    pub fn ring(&self) -> Arc<KeyRing> {
        self.ring.read().expect("key ring lock poisoned").clone()
    }

    /// Creates a spare key newer than the active one, unless one already
    /// exists, and returns the metadata to publish.
    ///
    /// The local ring is not modified; the spare key only becomes usable
    /// once the published metadata comes back through
    /// [`KeyManager::refresh_metadata`].
    #[must_use]
    pub fn generate_spare_key(&self) -> TokenKeysMetadata {
        let _ops = self.ops.lock().expect("key manager lock poisoned");
        let ring = self.ring();
        if ring.newest().key_hash() != ring.active_key_hash() {
            // A spare newer than the active key is already in flight.
            return metadata_from_entries(ring.entries(), ring.active_key_hash());
        }
        let timestamp = self.created_timestamps.fetch_add(1, Ordering::SeqCst) + 1;
        loop {
            let passphrase = SecureString::generate(PASSPHRASE_BYTES);
            let hash = KeyHash::of_passphrase(&passphrase);
            if ring.get(&hash).is_some() {
                // Hash collision: generate a new key.
                continue;
            }
            let mut keys: Vec<KeyWithTimestamp> = ring
                .entries()
                .map(|entry| key_with_timestamp(entry.key_and_timestamp()))
                .collect();
            keys.push(KeyWithTimestamp::new(passphrase, timestamp));
            return TokenKeysMetadata::new(keys, ring.active_key_hash().as_bytes().to_vec());
        }
    }

    /// Returns metadata naming the newest key as active.
    ///
    /// # Errors
    ///
    /// Fails if no spare key exists; callers must run
    /// [`KeyManager::generate_spare_key`] first.
    pub fn rotate_to_spare_key(&self) -> Result<TokenKeysMetadata, AuthError> {
        let _ops = self.ops.lock().expect("key manager lock poisoned");
        let ring = self.ring();
        let newest = ring.newest();
        if newest.key_hash() == ring.active_key_hash() {
            return Err(AuthError::invalid_request("call generate_spare_key first"));
        }
        Ok(metadata_from_entries(ring.entries(), newest.key_hash()))
    }

    /// Returns metadata keeping only the `keep` newest keys, never
    /// dropping the currently-active one.
    #[must_use]
    pub fn prune_keys(&self, keep: usize) -> TokenKeysMetadata {
        let _ops = self.ops.lock().expect("key manager lock poisoned");
        let ring = self.ring();
        if ring.len() <= keep {
            return metadata_from_entries(ring.entries(), ring.active_key_hash());
        }
        let active_timestamp = ring.active().key_and_timestamp().timestamp();
        let mut entries: Vec<&Arc<KeyAndCache>> = ring.entries().collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.key_and_timestamp().timestamp()));
        let mut kept = Vec::new();
        for entry in entries {
            let timestamp = entry.key_and_timestamp().timestamp();
            if kept.len() < keep || timestamp >= active_timestamp {
                tracing::debug!(key = %entry.key_hash(), "keeping key");
                kept.push(key_with_timestamp(entry.key_and_timestamp()));
            } else {
                tracing::debug!(key = %entry.key_hash(), "pruning key");
            }
        }
        TokenKeysMetadata::new(kept, ring.active_key_hash().as_bytes().to_vec())
    }

    /// The metadata describing the current ring.
    #[must_use]
    pub fn token_metadata(&self) -> TokenKeysMetadata {
        let _ops = self.ops.lock().expect("key manager lock poisoned");
        let ring = self.ring();
        metadata_from_entries(ring.entries(), ring.active_key_hash())
    }

    /// Rebuilds the ring from a metadata payload, preserving existing
    /// entries (and their derived-key caches) where the key hash matches.
    ///
    /// # Errors
    ///
    /// Metadata whose active hash names no listed key is a fatal
    /// inconsistency; the ring is left untouched.
    pub fn refresh_metadata(&self, metadata: &TokenKeysMetadata) -> Result<(), AuthError> {
        let _ops = self.ops.lock().expect("key manager lock poisoned");
        let current = self.ring();
        let active_key_hash = KeyHash::from_slice(&metadata.active_key_hash).ok_or_else(|| {
            AuthError::inconsistency("token keys metadata carries a malformed active key hash")
        })?;
        let mut keys = HashMap::with_capacity(metadata.keys.len());
        let mut max_timestamp = self.created_timestamps.load(Ordering::SeqCst);
        for key in &metadata.keys {
            let hash = KeyHash::of_passphrase(&key.passphrase);
            max_timestamp = max_timestamp.max(key.timestamp);
            let entry = match current.get(&hash) {
                // Keep the derived-key cache we already have.
                Some(existing) => existing.clone(),
                None => Arc::new(KeyAndCache::new(
                    KeyAndTimestamp::new(key.passphrase.clone(), key.timestamp),
                    Salt::random(),
                )),
            };
            keys.insert(hash, entry);
        }
        let ring = KeyRing::new(keys, active_key_hash)?;
        self.created_timestamps.store(max_timestamp, Ordering::SeqCst);
        let mut slot = self.ring.write().expect("key ring lock poisoned");
        *slot = Arc::new(ring);
        tracing::debug!(active = %active_key_hash, keys = slot.len(), "refreshed token keys");
        Ok(())
    }

    /// The active key's hash in its URL-safe textual form.
    #[must_use]
    pub fn active_key_hash_string(&self) -> String {
        self.ring().active_key_hash().to_string()
    }
}

fn key_with_timestamp(entry: &KeyAndTimestamp) -> KeyWithTimestamp {
    KeyWithTimestamp::new(entry.passphrase().clone(), entry.timestamp())
}

fn metadata_from_entries<'a>(
    entries: impl Iterator<Item = &'a Arc<KeyAndCache>>,
    active: &KeyHash,
) -> TokenKeysMetadata {
    let keys = entries
        .map(|entry| key_with_timestamp(entry.key_and_timestamp()))
        .collect();
    TokenKeysMetadata::new(keys, active.as_bytes().to_vec())
}
