use super::{CryptKind, SecureError};
use crate::cache::{CacheKey, HashCache};
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// One pooled key pair as shared through the cache.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPairSpec {
    pub index: usize,
    pub kind: CryptKind,
    /// SPKI DER, hex encoded. Sent to browsers.
    pub public_hex: String,
    /// PKCS#8 DER, hex encoded.
    pub private_hex: String,
}

impl fmt::Debug for KeyPairSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairSpec")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("public_hex", &self.public_hex)
            .finish_non_exhaustive()
    }
}

struct PooledKey {
    spec: KeyPairSpec,
    private: RsaPrivateKey,
}

impl PooledKey {
    fn from_spec(spec: KeyPairSpec) -> Result<Self, SecureError> {
        let der = hex::decode(&spec.private_hex)
            .map_err(|err| SecureError::Crypto(format!("private key is not hex: {err}")))?;
        let private = RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|err| SecureError::Crypto(format!("private key is not PKCS#8: {err}")))?;
        Ok(Self { spec, private })
    }
}

fn generate(index: usize, kind: CryptKind, bits: usize) -> Result<KeyPairSpec, SecureError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|err| SecureError::Crypto(format!("key generation failed: {err}")))?;
    let public = RsaPublicKey::from(&private);
    let public_der = public
        .to_public_key_der()
        .map_err(|err| SecureError::Crypto(err.to_string()))?;
    let private_der = private
        .to_pkcs8_der()
        .map_err(|err| SecureError::Crypto(err.to_string()))?;
    Ok(KeyPairSpec {
        index,
        kind,
        public_hex: hex::encode(public_der.as_bytes()),
        private_hex: hex::encode(private_der.as_bytes()),
    })
}

/// Fixed-size pool of key pairs for one [`CryptKind`].
///
/// The cache table is authoritative: the first node to store a slot wins and
/// every other node adopts that pair. Each node memoizes a slot once.
pub struct KeyPairPool {
    kind: CryptKind,
    bits: usize,
    table: HashCache,
    slots: Vec<OnceCell<Arc<PooledKey>>>,
}

impl KeyPairPool {
    #[must_use]
    pub fn new(kind: CryptKind, size: usize, bits: usize, table: HashCache) -> Self {
        Self {
            kind,
            bits,
            table,
            slots: (0..size).map(|_| OnceCell::new()).collect(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn kind(&self) -> CryptKind {
        self.kind
    }

    async fn slot(&self, index: usize) -> Result<Arc<PooledKey>, SecureError> {
        let cell = self.slots.get(index).ok_or_else(|| {
            SecureError::Configuration(format!(
                "key pair index {index} outside pool of {}",
                self.slots.len()
            ))
        })?;
        cell.get_or_try_init(|| self.load_or_create(index))
            .await
            .cloned()
    }

    #[instrument(skip(self))]
    async fn load_or_create(&self, index: usize) -> Result<Arc<PooledKey>, SecureError> {
        let field = CacheKey::new(index.to_string());
        if let Some(spec) = self.table.map_get_field::<KeyPairSpec>(&field).await? {
            debug!("adopted shared key pair");
            return PooledKey::from_spec(spec).map(Arc::new);
        }

        let (kind, bits) = (self.kind, self.bits);
        let generated = tokio::task::spawn_blocking(move || generate(index, kind, bits))
            .await
            .map_err(|err| SecureError::Crypto(format!("key generation task failed: {err}")))??;

        if self.table.map_put_if_absent(&field, &generated).await? {
            info!("generated key pair for pool slot");
            return PooledKey::from_spec(generated).map(Arc::new);
        }

        // Another node stored this slot first.
        let spec = self
            .table
            .map_get_field::<KeyPairSpec>(&field)
            .await?
            .ok_or_else(|| SecureError::Crypto(format!("key pair {index} vanished")))?;
        PooledKey::from_spec(spec).map(Arc::new)
    }

    /// Public half of slot `index`.
    ///
    /// # Errors
    /// Returns an error for an index outside the pool or a cache failure.
    pub async fn borrow(&self, index: usize) -> Result<KeyPairSpec, SecureError> {
        Ok(self.slot(index).await?.spec.clone())
    }

    /// Decrypt PKCS#1 v1.5 `ciphertext` with the private key of slot `index`.
    ///
    /// # Errors
    /// Returns an error when the slot cannot be loaded or decryption fails.
    pub async fn decrypt(&self, index: usize, ciphertext: &[u8]) -> Result<Vec<u8>, SecureError> {
        let key = self.slot(index).await?;
        key.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|err| SecureError::Crypto(format!("decryption failed: {err}")))
    }
}
