//! A passphrase and its derived-key cache.

use std::fmt;
use std::time::Duration;

use moka::sync::Cache;

use spindrift_core::SecureString;

use crate::keys::bytes_key::{KeyHash, Salt};
use crate::keys::derive::{DerivedKey, compute_secret_key};

/// Bound on cached derived keys per passphrase.
pub const KEY_CACHE_CAPACITY: u64 = 500;

/// Idle time after which a cached derived key is dropped.
pub const KEY_CACHE_IDLE: Duration = Duration::from_secs(60 * 60);

/// A passphrase tagged with the generation counter it was created under.
#[derive(Clone)]
pub struct KeyAndTimestamp {
    passphrase: SecureString,
    timestamp: i64,
}

impl KeyAndTimestamp {
    /// Creates a new entry.
    #[must_use]
    pub fn new(passphrase: SecureString, timestamp: i64) -> Self {
        Self {
            passphrase,
            timestamp,
        }
    }

    /// The secret passphrase.
    #[must_use]
    pub fn passphrase(&self) -> &SecureString {
        &self.passphrase
    }

    /// The generation counter.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Debug for KeyAndTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAndTimestamp")
            .field("passphrase", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One passphrase with its own salt, hash, and a bounded cache of keys
/// derived from it.
///
/// The cache is keyed by salt: the entry's own salt is used for
/// encryption and is computed eagerly at construction; foreign salts show
/// up when decoding bearer strings minted by other nodes (or attackers)
/// and are computed on demand through the derivation executor. Entries
/// fall out after [`KEY_CACHE_IDLE`] without access or beyond
/// [`KEY_CACHE_CAPACITY`]; eviction drops the last handle and zeroes the
/// key. Dropping the whole value zeroes the passphrase.
pub struct KeyAndCache {
    key_and_timestamp: KeyAndTimestamp,
    salt: Salt,
    key_hash: KeyHash,
    cache: Cache<Salt, DerivedKey>,
}

impl KeyAndCache {
    /// Creates the cache and eagerly derives the key for the entry's own
    /// salt.
    ///
    /// Expensive; called from key-manager operations, never from request
    /// handling.
    #[must_use]
    pub fn new(key_and_timestamp: KeyAndTimestamp, salt: Salt) -> Self {
        let cache = Cache::builder()
            .max_capacity(KEY_CACHE_CAPACITY)
            .time_to_idle(KEY_CACHE_IDLE)
            .build();
        let own_key = compute_secret_key(key_and_timestamp.passphrase(), &salt);
        cache.insert(salt.clone(), own_key);
        let key_hash = KeyHash::of_passphrase(key_and_timestamp.passphrase());
        Self {
            key_and_timestamp,
            salt,
            key_hash,
            cache,
        }
    }

    /// Returns the cached key for `salt` without computing.
    #[must_use]
    pub fn cached(&self, salt: &Salt) -> Option<DerivedKey> {
        self.cache.get(salt)
    }

    /// Returns the key for `salt`, deriving and caching it if absent.
    ///
    /// Runs PBKDF2 on the calling thread; only the derivation executor
    /// and key-manager setup call this.
    #[must_use]
    pub fn get_or_compute(&self, salt: &Salt) -> DerivedKey {
        self.cache.get_with(salt.clone(), || {
            compute_secret_key(self.key_and_timestamp.passphrase(), salt)
        })
    }

    /// The passphrase and its generation counter.
    #[must_use]
    pub fn key_and_timestamp(&self) -> &KeyAndTimestamp {
        &self.key_and_timestamp
    }

    /// The entry's own salt, used when encrypting.
    #[must_use]
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// The hash identifying this key.
    #[must_use]
    pub fn key_hash(&self) -> &KeyHash {
        &self.key_hash
    }
}

impl fmt::Debug for KeyAndCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAndCache")
            .field("key_hash", &self.key_hash)
            .field("timestamp", &self.key_and_timestamp.timestamp())
            .finish()
    }
}
