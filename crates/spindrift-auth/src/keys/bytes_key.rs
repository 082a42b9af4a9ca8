//! Fixed-width byte primitives for key material.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use spindrift_core::SecureString;

/// First 8 bytes of SHA-256 over a passphrase; identifies a key across the
/// cluster without revealing anything about the passphrase.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash([u8; KeyHash::LENGTH]);

impl KeyHash {
    /// Width of a key hash in bytes.
    pub const LENGTH: usize = 8;

    /// Computes the hash of a passphrase.
    #[must_use]
    pub fn of_passphrase(passphrase: &SecureString) -> Self {
        let digest = Sha256::digest(passphrase.expose().as_bytes());
        let mut bytes = [0u8; Self::LENGTH];
        bytes.copy_from_slice(&digest[..Self::LENGTH]);
        Self(bytes)
    }

    /// Wraps exactly [`KeyHash::LENGTH`] bytes; `None` otherwise.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LENGTH] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// The raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hashes read better as base64 than as byte arrays in logs.
        fmt::Display::fmt(self, f)
    }
}

/// A 32-byte key-derivation salt.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Salt([u8; Salt::LENGTH]);

impl Salt {
    /// Width of a salt in bytes.
    pub const LENGTH: usize = 32;

    /// Generates a random salt from the OS CSPRNG.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps exactly [`Salt::LENGTH`] bytes; `None` otherwise.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LENGTH] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// The raw salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", URL_SAFE_NO_PAD.encode(self.0))
    }
}
