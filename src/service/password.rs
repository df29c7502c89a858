//! Password Hashing
//!
//! Pluggable one-way credential hashing. The default implementation is Argon2id
//! with a random per-password salt, producing PHC strings that embed the
//! algorithm, parameters and salt.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Password hashing failed: {0}")]
pub struct HashingError(String);

/// One-way credential hashing primitive
pub trait PasswordHasher: Send + Sync {
    /// Produce a self-describing hash of `password`
    fn hash(&self, password: &str) -> Result<String, HashingError>;

    /// Check `password` against `hash`. Malformed hashes verify as false.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id with the crate's default parameters
#[derive(Clone, Default)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Argon2id with explicit cost parameters (memory in KiB)
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, HashingError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| HashingError(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, HashingError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashingError(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .ok()
            .map(|parsed| {
                self.argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}
