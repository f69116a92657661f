use super::{
    cross_combined, hash, select_algorithm, CredentialsToken, CryptKind, KeyPairPool,
    SecureConfig, SecureError,
};
use crate::cache::CacheManager;
use crate::session::{now_ms, Session};
use rand::{rngs::OsRng, Rng, RngCore};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

/// Session attribute holding the leased pool index.
pub const KEY_SECRET_INDEX: &str = "secret_index";

/// Credential material as persisted for an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Hex signature produced by [`CredentialsSecurer::signature`].
    pub credentials: Option<String>,
    /// Hex-encoded per-account salt.
    pub public_salt: Option<String>,
}

pub struct CredentialsSecurer {
    config: SecureConfig,
    rsa: KeyPairPool,
}

impl CredentialsSecurer {
    /// # Errors
    /// Returns an error if the configuration is incomplete.
    pub fn new(config: SecureConfig, caches: &CacheManager) -> Result<Self, SecureError> {
        config.validate()?;
        let rsa = KeyPairPool::new(
            CryptKind::Rsa,
            config.pool_size(),
            config.key_bits(),
            caches.hash_cache(&format!("keypairs:{}", CryptKind::Rsa)),
        );
        Ok(Self { config, rsa })
    }

    #[must_use]
    pub fn config(&self) -> &SecureConfig {
        &self.config
    }

    fn pool(&self, kind: CryptKind) -> &KeyPairPool {
        match kind {
            CryptKind::Rsa => &self.rsa,
        }
    }

    /// Lease a public key to `session`. A session that already holds a lease
    /// keeps its index; the lease expiry is refreshed either way.
    ///
    /// # Errors
    /// Returns an error if the pool slot cannot be loaded.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn apply_secret(
        &self,
        session: &mut Session,
        kind: CryptKind,
    ) -> Result<String, SecureError> {
        let now = now_ms();
        let pool = self.pool(kind);
        let index = session
            .get::<usize>(KEY_SECRET_INDEX, now)
            .filter(|index| *index < pool.size())
            .unwrap_or_else(|| OsRng.gen_range(0..pool.size()));
        debug!("applied secret key index {index}");

        let spec = pool.borrow(index).await?;
        session
            .bind(
                KEY_SECRET_INDEX,
                &index,
                Some(self.config.apply_pubkey_expire()),
                now,
            )
            .map_err(|err| SecureError::Crypto(err.to_string()))?;
        Ok(spec.public_hex)
    }

    /// Decrypt a submitted token with the key leased to `session`. The lease
    /// is consumed: a second resolve needs a new `apply_secret`.
    ///
    /// # Errors
    /// [`SecureError::SecretExpired`] when the session holds no lease,
    /// [`SecureError::InvalidCredentials`] when the plaintext is blank or
    /// the ciphertext is malformed.
    #[instrument(skip_all, fields(principal = %token.principal))]
    pub async fn resolve(
        &self,
        session: &mut Session,
        token: CredentialsToken,
    ) -> Result<CredentialsToken, SecureError> {
        if token.solved {
            return Ok(token);
        }
        let Some(index) = session.take::<usize>(KEY_SECRET_INDEX, now_ms()) else {
            warn!("secret key expired");
            return Err(SecureError::SecretExpired);
        };

        let ciphertext = hex::decode(token.credentials.trim())
            .map_err(|_| SecureError::InvalidCredentials)?;
        let plain = match self.pool(token.kind).decrypt(index, &ciphertext).await {
            Ok(plain) => plain,
            Err(SecureError::Crypto(err)) => {
                debug!("credentials did not decrypt: {err}");
                return Err(SecureError::InvalidCredentials);
            }
            Err(err) => return Err(err),
        };
        let plain = String::from_utf8(plain).map_err(|_| SecureError::InvalidCredentials)?;
        if plain.trim().is_empty() {
            return Err(SecureError::InvalidCredentials);
        }
        Ok(CredentialsToken::plain(&token.principal, &plain, token.kind))
    }

    /// Hash plaintext credentials with the private salt merged into
    /// `public_salt`.
    #[must_use]
    pub fn hash_credentials(&self, credentials: &str, public_salt: &[u8]) -> String {
        let salt = cross_combined(
            self.config.private_salt().expose_secret().as_bytes(),
            public_salt,
        );
        match select_algorithm(&salt, self.config.algorithms()) {
            Some((algorithm, iterations)) => {
                hash(algorithm, credentials.as_bytes(), &salt, iterations)
            }
            // validate() rejects an empty algorithm list
            None => String::new(),
        }
    }

    /// Signature of `token` under the hex `public_salt`, resolving the token
    /// first when it is still encrypted.
    ///
    /// # Errors
    /// [`SecureError::Configuration`] when the salt is missing or not hex,
    /// plus every error of [`Self::resolve`].
    pub async fn signature(
        &self,
        session: &mut Session,
        token: CredentialsToken,
        public_salt: Option<&str>,
    ) -> Result<String, SecureError> {
        let salt = decode_salt(public_salt)?;
        let token = self.resolve(session, token).await?;
        Ok(self.hash_credentials(&token.credentials, &salt))
    }

    /// Compare the submitted credentials against the stored signature in
    /// constant time.
    ///
    /// # Errors
    /// [`SecureError::Configuration`] when the stored credential or salt is
    /// missing, plus every error of [`Self::resolve`].
    pub async fn validate(
        &self,
        session: &mut Session,
        token: CredentialsToken,
        stored: &StoredCredentials,
    ) -> Result<bool, SecureError> {
        let expected = stored.credentials.as_deref().ok_or_else(|| {
            SecureError::Configuration(format!(
                "stored credentials missing for principal '{}'",
                token.principal
            ))
        })?;
        let signature = self
            .signature(session, token, stored.public_salt.as_deref())
            .await?;
        Ok(bool::from(signature.as_bytes().ct_eq(expected.as_bytes())))
    }

    /// Fresh random per-account salt (16 bytes, hex).
    ///
    /// # Errors
    /// Returns an error if the operating system RNG fails.
    pub fn generate_public_salt() -> Result<String, SecureError> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| SecureError::Crypto(err.to_string()))?;
        Ok(hex::encode(bytes))
    }
}

fn decode_salt(public_salt: Option<&str>) -> Result<Vec<u8>, SecureError> {
    let salt = public_salt
        .map(str::trim)
        .filter(|salt| !salt.is_empty())
        .ok_or_else(|| SecureError::Configuration("public salt is required".to_string()))?;
    hex::decode(salt)
        .map_err(|err| SecureError::Configuration(format!("public salt is not hex: {err}")))
}
