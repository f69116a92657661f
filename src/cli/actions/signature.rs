use crate::{
    cache::CacheManager,
    cli::commands::secure::SignatureOptions,
    secure::{CredentialsSecurer, SecureConfig},
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Debug)]
pub struct Args {
    pub options: SignatureOptions,
}

/// Stored credential fields of an account, as found in the registry.
#[derive(Debug, Serialize)]
pub struct Signature {
    pub credentials: String,
    pub public_salt: String,
}

/// Compute the signature for the given credentials.
///
/// # Errors
/// Returns an error if the salt is not hex or the settings are invalid.
pub fn sign(options: &SignatureOptions) -> Result<Signature> {
    let public_salt = match &options.public_salt {
        Some(salt) => salt.clone(),
        None => CredentialsSecurer::generate_public_salt()?,
    };
    let salt = hex::decode(&public_salt).context("public salt must be hex encoded")?;

    // only the hashing half is used, the key pool is never touched
    let caches = CacheManager::in_memory("signature");
    let config =
        SecureConfig::new(options.private_salt.clone()).with_algorithms(options.algorithms.clone());
    let securer = CredentialsSecurer::new(config, &caches)?;

    Ok(Signature {
        credentials: securer.hash_credentials(options.credentials.expose_secret(), &salt),
        public_salt,
    })
}

/// Print the registry fields for an account.
///
/// # Errors
/// Returns an error if signing fails.
pub fn execute(args: &Args) -> Result<()> {
    let signature = sign(&args.options)?;
    println!("{}", serde_json::to_string_pretty(&signature)?);
    Ok(())
}
