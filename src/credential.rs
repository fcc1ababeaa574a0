//! # Credential Pair Generator
//!
//! Mints a random alphanumeric plaintext credential together with its
//! Argon2id hash in PHC format (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`),
//! which is what Authelia's file backend verifies against.
//!
//! Generation fails closed: an error from the OS random source or from the
//! hasher aborts and nothing partial is returned.

use crate::constants::{
    ARGON2_OUTPUT_LENGTH, ARGON2_SALT_LENGTH, DEFAULT_ARGON2_ITERATIONS,
    DEFAULT_ARGON2_MEMORY_KIB, DEFAULT_ARGON2_PARALLELISM,
};
use crate::error::{SyncError, SyncResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::TryRngCore;
use zeroize::Zeroizing;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every character is equally likely.
const REJECTION_BOUND: u8 = (256 - 256 % ALPHABET.len()) as u8;

/// Plaintext credential and its one-way hash
///
/// The plaintext only lives in memory and in the Authelia secret; it is
/// wiped on drop and never shows up in `Debug` output.
#[derive(Clone)]
pub struct CredentialPair {
    pub plaintext: Zeroizing<String>,
    pub hash: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("plaintext", &"<redacted>")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPolicy {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            iterations: DEFAULT_ARGON2_ITERATIONS,
            parallelism: DEFAULT_ARGON2_PARALLELISM,
        }
    }
}

impl HashPolicy {
    fn hasher(&self) -> SyncResult<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(ARGON2_OUTPUT_LENGTH),
        )
        .map_err(|e| SyncError::validation(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Anything able to mint credential pairs
///
/// The reconciler depends on this rather than on [`CredentialGenerator`]
/// directly so tests can swap in a failing source.
pub trait CredentialSource: Send + Sync {
    fn generate(&self) -> SyncResult<CredentialPair>;
}

/// Generator backed by the OS random source and Argon2id
#[derive(Debug, Clone)]
pub struct CredentialGenerator {
    length: usize,
    policy: HashPolicy,
}

impl CredentialGenerator {
    /// Create a generator for credentials of `length` characters
    ///
    /// Fails with [`SyncError::Validation`] for a zero length or an
    /// out-of-range hash cost.
    pub fn new(length: usize, policy: HashPolicy) -> SyncResult<Self> {
        if length == 0 {
            return Err(SyncError::validation("credential length must be positive"));
        }
        policy.hasher()?;
        Ok(Self { length, policy })
    }

    /// Draw `length` alphanumeric characters and hash them
    pub fn generate_with_length(&self, length: usize) -> SyncResult<CredentialPair> {
        if length == 0 {
            return Err(SyncError::validation("credential length must be positive"));
        }
        let plaintext = random_alphanumeric(length)?;
        let hash = hash_credential(&plaintext, &self.policy)?;
        Ok(CredentialPair { plaintext, hash })
    }
}

impl CredentialSource for CredentialGenerator {
    fn generate(&self) -> SyncResult<CredentialPair> {
        self.generate_with_length(self.length)
    }
}

fn random_alphanumeric(length: usize) -> SyncResult<Zeroizing<String>> {
    let mut out = Zeroizing::new(String::with_capacity(length));
    let mut buffer = Zeroizing::new([0u8; 64]);

    while out.len() < length {
        OsRng
            .try_fill_bytes(&mut buffer[..])
            .map_err(|e| SyncError::RandomSourceExhausted(e.to_string()))?;
        for &byte in buffer.iter() {
            if out.len() == length {
                break;
            }
            if byte < REJECTION_BOUND {
                out.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
            }
        }
    }

    Ok(out)
}

fn random_salt() -> SyncResult<SaltString> {
    let mut bytes = [0u8; ARGON2_SALT_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SyncError::RandomSourceExhausted(e.to_string()))?;
    SaltString::encode_b64(&bytes).map_err(|e| SyncError::RandomSourceExhausted(e.to_string()))
}

/// Hash a plaintext credential with a fresh random salt
pub fn hash_credential(plaintext: &str, policy: &HashPolicy) -> SyncResult<String> {
    let salt = random_salt()?;
    let hash = policy
        .hasher()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| SyncError::RandomSourceExhausted(format!("argon2 hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Check a plaintext credential against a PHC hash string
///
/// Parameters are read from the hash itself, so any Argon2 variant verifies.
pub fn verify_credential(plaintext: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .and_then(|parsed| Argon2::default().verify_password(plaintext.as_bytes(), &parsed))
        .is_ok()
}
