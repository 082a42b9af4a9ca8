//! Random identifier generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Length of a generated token id in characters (128 bits, base64url).
pub const TOKEN_ID_LENGTH: usize = 22;

/// Generates a random 128-bit identifier encoded as unpadded URL-safe
/// base64 (22 characters).
///
/// Uses the operating system CSPRNG directly; these ids name secret-bearing
/// documents and must not be guessable.
#[must_use]
pub fn random_token_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_has_expected_shape() {
        let id = random_token_id();
        assert_eq!(id.len(), TOKEN_ID_LENGTH);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<String> = (0..100).map(|_| random_token_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }
}
