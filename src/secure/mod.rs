//! Credential transport and verification.
//!
//! Browsers never send plaintext passwords: they apply for a leased RSA
//! public key bound to their session, encrypt the password with it, and the
//! authenticator decrypts with the matching private key from a shared pool.
//! The stored credential is a salted, iterated hash whose algorithm is picked
//! from the merged salt itself.

mod hash;
mod keypair;
mod salt;
mod securer;

pub use hash::{hash, HashAlgorithm};
pub use keypair::{KeyPairPool, KeyPairSpec};
pub use salt::{cross_combined, select_algorithm};
pub use securer::{CredentialsSecurer, StoredCredentials};

#[cfg(test)]
pub(crate) use keypair::tests::encrypt_hex;

use crate::cache::CacheError;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: usize = 16;
pub const DEFAULT_KEY_BITS: usize = 1024;
pub const DEFAULT_APPLY_PUBKEY_EXPIRE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum SecureError {
    #[error("secret key expired, apply for a new one")]
    SecretExpired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credentials configuration error: {0}")]
    Configuration(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Asymmetric scheme used to transport credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CryptKind {
    Rsa,
}

impl CryptKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
        }
    }
}

impl fmt::Display for CryptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptKind {
    type Err = SecureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa),
            other => Err(SecureError::Configuration(format!(
                "unsupported crypt kind: {other}"
            ))),
        }
    }
}

/// Credentials as submitted by a login form.
///
/// `solved` is false while `credentials` still holds the hex ciphertext.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialsToken {
    pub principal: String,
    pub credentials: String,
    pub kind: CryptKind,
    pub solved: bool,
}

impl CredentialsToken {
    #[must_use]
    pub fn encrypted(principal: &str, ciphertext_hex: &str, kind: CryptKind) -> Self {
        Self {
            principal: principal.to_string(),
            credentials: ciphertext_hex.to_string(),
            kind,
            solved: false,
        }
    }

    #[must_use]
    pub fn plain(principal: &str, credentials: &str, kind: CryptKind) -> Self {
        Self {
            principal: principal.to_string(),
            credentials: credentials.to_string(),
            kind,
            solved: true,
        }
    }
}

impl fmt::Debug for CredentialsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsToken")
            .field("principal", &self.principal)
            .field("credentials", &"******")
            .field("kind", &self.kind)
            .field("solved", &self.solved)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct SecureConfig {
    private_salt: SecretString,
    algorithms: Vec<HashAlgorithm>,
    pool_size: usize,
    key_bits: usize,
    apply_pubkey_expire: Duration,
}

impl SecureConfig {
    #[must_use]
    pub fn new(private_salt: SecretString) -> Self {
        Self {
            private_salt,
            algorithms: HashAlgorithm::defaults(),
            pool_size: DEFAULT_POOL_SIZE,
            key_bits: DEFAULT_KEY_BITS,
            apply_pubkey_expire: DEFAULT_APPLY_PUBKEY_EXPIRE,
        }
    }

    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<HashAlgorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    #[must_use]
    pub fn with_apply_pubkey_expire(mut self, expire: Duration) -> Self {
        self.apply_pubkey_expire = expire;
        self
    }

    #[must_use]
    pub fn private_salt(&self) -> &SecretString {
        &self.private_salt
    }

    #[must_use]
    pub fn algorithms(&self) -> &[HashAlgorithm] {
        &self.algorithms
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    #[must_use]
    pub fn apply_pubkey_expire(&self) -> Duration {
        self.apply_pubkey_expire
    }

    /// # Errors
    /// Returns an error when a required value is empty or zero.
    pub fn validate(&self) -> Result<(), SecureError> {
        use secrecy::ExposeSecret;

        if self.private_salt.expose_secret().is_empty() {
            return Err(SecureError::Configuration("private salt is empty".into()));
        }
        if self.algorithms.is_empty() {
            return Err(SecureError::Configuration("no hash algorithms".into()));
        }
        if self.pool_size == 0 {
            return Err(SecureError::Configuration("key pair pool is empty".into()));
        }
        if self.apply_pubkey_expire.is_zero() {
            return Err(SecureError::Configuration(
                "apply public key expiry must be positive".into(),
            ));
        }
        Ok(())
    }
}
