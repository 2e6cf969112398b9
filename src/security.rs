//! Security module for the condo management core
//!
//! Implements the salted password hashing scheme used by the user
//! repository. The stored format is `hex(digest) + ":" + hex(salt)` where
//! `digest = SHA-256(salt || password)`. A single digest round is kept for
//! compatibility with hashes already in the database: verification must be
//! bit-identical for legacy records.

use crate::errors::{AppError, AppResult};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Deterministic salted password hashing
pub struct PasswordHasher;

impl PasswordHasher {
    /// Hash a password with a fresh random salt.
    ///
    /// Two hashes of the same password differ because the salts differ.
    pub fn hash(password: &str) -> AppResult<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| AppError::internal("Salt generation failed"))?;
        Ok(Self::hash_with_salt(password, &salt))
    }

    fn hash_with_salt(password: &str, salt: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        format!("{}:{}", hex::encode(hasher.finalize()), hex::encode(salt))
    }

    /// Verify a password against a stored `digest:salt` value.
    ///
    /// Malformed stored values verify as false, never as an error. The
    /// digest comparison is constant-time.
    pub fn verify(password: &str, stored: &str) -> bool {
        let Some((digest_hex, salt_hex)) = stored.split_once(':') else {
            return false;
        };
        let Ok(salt) = hex::decode(salt_hex) else {
            return false;
        };
        let Ok(expected) = hex::decode(digest_hex) else {
            return false;
        };

        let mut hasher = Sha256::new();
        hasher.update(&salt);
        hasher.update(password.as_bytes());
        let digest = hasher.finalize();

        ring::constant_time::verify_slices_are_equal(digest.as_slice(), &expected).is_ok()
    }
}
