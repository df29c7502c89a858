//! Security Utilities
//!
//! Random token generation and keyed/unkeyed hashing helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes behind refresh secrets and one-time tokens
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Generate a URL-safe random token from `num_bytes` of OS entropy
pub fn generate_secure_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a SHA-256 hex digest of sensitive data for storage
pub fn hash_sensitive_data(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic device tag: hex(HMAC-SHA256(key, ip || "|" || user_agent))
pub fn fingerprint(key: &[u8], ip: &str, user_agent: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(ip.as_bytes());
    mac.update(b"|");
    mac.update(user_agent.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_token() {
        let token1 = generate_secure_token(TOKEN_ENTROPY_BYTES);
        let token2 = generate_secure_token(TOKEN_ENTROPY_BYTES);

        // 32 bytes -> 43 unpadded base64 chars
        assert_eq!(token1.len(), 43);
        assert_ne!(token1, token2);
        assert!(token1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_sensitive_data() {
        let hash1 = hash_sensitive_data("sensitive_data");
        let hash2 = hash_sensitive_data("sensitive_data");

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_sensitive_data("other_data"));
    }

    #[test]
    fn test_fingerprint_is_keyed_and_deterministic() {
        let a = fingerprint(b"secret", "127.0.0.1", "curl/8.0");
        let b = fingerprint(b"secret", "127.0.0.1", "curl/8.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, fingerprint(b"other", "127.0.0.1", "curl/8.0"));
        assert_ne!(a, fingerprint(b"secret", "127.0.0.2", "curl/8.0"));
    }

    #[test]
    fn test_fingerprint_matches_concatenated_message() {
        let mut mac = HmacSha256::new_from_slice(b"k").unwrap();
        mac.update(b"1.2.3.4|agent");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(fingerprint(b"k", "1.2.3.4", "agent"), expected);
    }
}
