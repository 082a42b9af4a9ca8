//! Key derivation.
//!
//! Deriving an encryption key from a passphrase and salt is deliberately
//! expensive (PBKDF2-HMAC-SHA512, 100 000 iterations) and must never run
//! on a request-handling task. [`KeyDerivationExecutor`] funnels all
//! uncached derivations through one dedicated thread, which also bounds
//! the damage of a flood of bearer strings carrying unknown salts.

use std::fmt;
use std::sync::Arc;

use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use tokio::sync::{mpsc, oneshot};
use zeroize::Zeroizing;

use spindrift_core::SecureString;

use crate::keys::bytes_key::Salt;
use crate::keys::cache::KeyAndCache;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Width of a derived key in bytes (AES-128).
pub const DERIVED_KEY_BYTES: usize = 16;

/// Queue depth of the derivation executor.
const EXECUTOR_QUEUE: usize = 128;

/// An AES key derived from a passphrase and salt.
///
/// The bytes are zeroed when the last handle drops, including on eviction
/// from a [`KeyAndCache`].
#[derive(Clone)]
pub struct DerivedKey(Arc<Zeroizing<[u8; DERIVED_KEY_BYTES]>>);

impl DerivedKey {
    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DerivedKey").field(&"[REDACTED]").finish()
    }
}

/// Derives the AES key for `(passphrase, salt)`.
///
/// Computationally expensive; callers outside key-manager setup go
/// through [`KeyDerivationExecutor`] instead of calling this directly.
#[must_use]
pub fn compute_secret_key(passphrase: &SecureString, salt: &Salt) -> DerivedKey {
    let mut out = Zeroizing::new([0u8; DERIVED_KEY_BYTES]);
    pbkdf2_hmac::<Sha512>(
        passphrase.expose().as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut *out,
    );
    DerivedKey(Arc::new(out))
}

struct DerivationJob {
    entry: Arc<KeyAndCache>,
    salt: Salt,
    reply: oneshot::Sender<DerivedKey>,
}

/// Single-threaded executor for uncached key derivations.
///
/// Dropping the executor closes the queue and lets the worker thread
/// exit.
pub struct KeyDerivationExecutor {
    sender: mpsc::Sender<DerivationJob>,
}

impl KeyDerivationExecutor {
    /// Spawns the worker thread under the given name.
    #[must_use]
    pub fn new(thread_name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<DerivationJob>(EXECUTOR_QUEUE);
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    let key = job.entry.get_or_compute(&job.salt);
                    // Receiver may have given up; nothing to do then.
                    let _ = job.reply.send(key);
                }
            })
            .expect("failed to spawn key derivation thread");
        Self { sender }
    }

    /// Returns the derived key for `(entry, salt)`.
    ///
    /// Cached keys resolve immediately on the calling task; everything
    /// else is queued to the worker thread. Returns `None` only if the
    /// executor has shut down.
    pub async fn derive(&self, entry: Arc<KeyAndCache>, salt: Salt) -> Option<DerivedKey> {
        if let Some(key) = entry.cached(&salt) {
            return Some(key);
        }
        let (reply, response) = oneshot::channel();
        self.sender
            .send(DerivationJob { entry, salt, reply })
            .await
            .ok()?;
        response.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::cache::KeyAndTimestamp;

    #[test]
    fn derivation_is_deterministic() {
        let passphrase = SecureString::from("passphrase");
        let salt = Salt::random();
        let a = compute_secret_key(&passphrase, &salt);
        let b = compute_secret_key(&passphrase, &salt);
        assert_eq!(a.as_bytes(), b.as_bytes());

        let other_salt = Salt::random();
        let c = compute_secret_key(&passphrase, &other_salt);
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn executor_computes_and_caches() {
        let entry = Arc::new(KeyAndCache::new(
            KeyAndTimestamp::new(SecureString::from("passphrase"), 0),
            Salt::random(),
        ));
        let executor = KeyDerivationExecutor::new("test-token-key");

        let foreign_salt = Salt::random();
        assert!(entry.cached(&foreign_salt).is_none());

        let key = executor
            .derive(entry.clone(), foreign_salt.clone())
            .await
            .unwrap();
        // Now cached; the fast path returns the same key.
        let cached = entry.cached(&foreign_salt).unwrap();
        assert_eq!(key.as_bytes(), cached.as_bytes());
    }
}
