//! Secret string handling.
//!
//! Passphrases and other secret character sequences are held in a
//! [`SecureString`], which wipes its backing memory when dropped and never
//! prints its contents through `Debug`.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// An owned secret character sequence.
///
/// The backing bytes are zeroed when the value is dropped. Equality is
/// evaluated in constant time so that secret comparison does not leak the
/// position of the first differing byte.
#[derive(Clone)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    /// Wraps an existing string. The caller should not retain other copies.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Generates a new random secret from `num_bytes` of OS randomness,
    /// encoded as unpadded URL-safe base64 characters.
    ///
    /// The intermediate random bytes are wiped before returning.
    #[must_use]
    pub fn generate(num_bytes: usize) -> Self {
        let mut raw = Zeroizing::new(vec![0u8; num_bytes]);
        OsRng.fill_bytes(&mut raw);
        let encoded = Zeroizing::new(URL_SAFE_NO_PAD.encode(&*raw));
        Self::new(encoded.to_string())
    }

    /// Exposes the secret characters.
    ///
    /// Callers must not copy the value into longer-lived storage.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecureString {}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecureString").field(&"[REDACTED]").finish()
    }
}

impl Zeroize for SecureString {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_base64url() {
        let secret = SecureString::generate(64);
        // 64 bytes in unpadded base64 = 86 characters
        assert_eq!(secret.len(), 86);
        assert!(
            secret
                .expose()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn generated_secrets_differ() {
        assert_ne!(SecureString::generate(64), SecureString::generate(64));
    }

    #[test]
    fn equality_is_by_content() {
        let a = SecureString::from("swordfish");
        let b = SecureString::from("swordfish");
        let c = SecureString::from("swordfish2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_redacts() {
        let secret = SecureString::from("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
