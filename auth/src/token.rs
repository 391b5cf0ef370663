//! Token generation and hashing.
//!
//! Every secret handed to a client is produced here, and every secret that
//! reaches a store passes through [`TokenHash::of`] first. The raw value is
//! never persisted: a reader of the store cannot forge a valid token.

use base64::Engine;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of random bytes in a session token (256 bits).
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Shortest value that can be a session token.
///
/// Anything shorter is rejected without a store lookup.
pub const MIN_TOKEN_LENGTH: usize = 13;

/// Default one-time code alphabet.
///
/// Digits and uppercase letters without the visually confusable `0`, `O` and `I`.
pub const DEFAULT_CODE_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generate a session token.
///
/// Returns 256 bits from the OS RNG encoded as base64url without padding
/// (43 characters).
#[must_use]
pub fn generate_session_token() -> String {
    let mut random_bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate a one-time code of `length` characters drawn from `alphabet`.
///
/// Returns `None` when the alphabet is empty.
#[must_use]
pub fn generate_code(length: usize, alphabet: &str) -> Option<String> {
    let symbols: Vec<char> = alphabet.chars().collect();
    if symbols.is_empty() {
        return None;
    }

    let mut rng = OsRng;
    Some(
        (0..length)
            .map(|_| symbols[rng.gen_range(0..symbols.len())])
            .collect(),
    )
}

/// SHA-256 hash of a raw token, lowercase hex encoded.
///
/// This is the only form in which tokens are stored or compared. Equality is
/// constant-time.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    /// Hash a raw token.
    #[must_use]
    pub fn of(raw: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(raw.as_bytes())))
    }

    /// Wrap an already-hashed value read back from a store.
    #[must_use]
    pub const fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    /// Hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to log.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl PartialEq for TokenHash {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq::constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for TokenHash {}

impl std::hash::Hash for TokenHash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}…)", self.prefix())
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_session_token_generation() {
        let token1 = generate_session_token();
        let token2 = generate_session_token();

        assert_ne!(token1, token2);
        assert_eq!(token1.len(), 43);
        assert!(token1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_code_generation_uses_alphabet() {
        let code = generate_code(32, DEFAULT_CODE_ALPHABET).unwrap_or_default();

        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| DEFAULT_CODE_ALPHABET.contains(c)));
        assert!(!code.contains('0'));
        assert!(!code.contains('O'));
        assert!(!code.contains('I'));
    }

    #[test]
    fn test_code_generation_empty_alphabet() {
        assert!(generate_code(8, "").is_none());
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        // echo -n "abc" | sha256sum
        assert_eq!(
            TokenHash::of("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_equality() {
        let hash = TokenHash::of("secret-token");
        assert_eq!(hash, TokenHash::of("secret-token"));
        assert_eq!(hash, TokenHash::from_hex(hash.as_str().to_string()));
        assert_ne!(hash, TokenHash::of("secret-token2"));
    }

    #[test]
    fn test_debug_does_not_print_full_hash() {
        let hash = TokenHash::of("secret-token");
        let debug = format!("{hash:?}");
        assert!(!debug.contains(hash.as_str()));
        assert!(debug.contains(hash.prefix()));
    }

    proptest! {
        #[test]
        fn prop_code_length_and_alphabet(length in 1usize..64) {
            let code = generate_code(length, DEFAULT_CODE_ALPHABET).unwrap_or_default();
            prop_assert_eq!(code.chars().count(), length);
            prop_assert!(code.chars().all(|c| DEFAULT_CODE_ALPHABET.contains(c)));
        }
    }
}
