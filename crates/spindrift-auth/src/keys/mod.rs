//! Cryptographic key lifecycle.
//!
//! Bearer strings minted before the opaque-format cutover are encrypted
//! with keys derived from cluster-wide passphrases. This module owns those
//! passphrases end to end: fixed-width byte primitives, the per-passphrase
//! derived-key cache, the immutable [`KeyRing`] snapshot every request
//! reads, the single-threaded derivation executor, and the [`KeyManager`]
//! that generates, rotates, prunes and rebuilds keys from cluster
//! metadata.

pub mod bytes_key;
pub mod cache;
pub mod derive;
pub mod manager;
pub mod ring;

pub use bytes_key::{KeyHash, Salt};
pub use cache::{KeyAndCache, KeyAndTimestamp};
pub use derive::{DerivedKey, KeyDerivationExecutor, compute_secret_key};
pub use manager::KeyManager;
pub use ring::KeyRing;
