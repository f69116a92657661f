use super::SecureError;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Default selection table. Order matters: stored hashes index into it.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::Md5, Self::Sha256, Self::Sha384, Self::Sha512]
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SecureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA-256" | "SHA256" => Ok(Self::Sha256),
            "SHA-384" | "SHA384" => Ok(Self::Sha384),
            "SHA-512" | "SHA512" => Ok(Self::Sha512),
            other => Err(SecureError::Configuration(format!(
                "unsupported hash algorithm: {other}"
            ))),
        }
    }
}

fn iterate<D: Digest>(source: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut digest = D::new();
    digest.update(salt);
    digest.update(source);
    let mut hashed = digest.finalize().to_vec();
    for _ in 1..iterations {
        hashed = D::digest(&hashed).to_vec();
    }
    hashed
}

/// `digest(salt || source)`, re-digested `iterations - 1` more times, as hex.
#[must_use]
pub fn hash(algorithm: HashAlgorithm, source: &[u8], salt: &[u8], iterations: u32) -> String {
    let iterations = iterations.max(1);
    let hashed = match algorithm {
        HashAlgorithm::Md5 => iterate::<Md5>(source, salt, iterations),
        HashAlgorithm::Sha256 => iterate::<Sha256>(source, salt, iterations),
        HashAlgorithm::Sha384 => iterate::<Sha384>(source, salt, iterations),
        HashAlgorithm::Sha512 => iterate::<Sha512>(source, salt, iterations),
    };
    hex::encode(hashed)
}
