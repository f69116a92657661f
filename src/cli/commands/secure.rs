use crate::secure::{
    HashAlgorithm, SecureConfig, DEFAULT_APPLY_PUBKEY_EXPIRE, DEFAULT_KEY_BITS, DEFAULT_POOL_SIZE,
};
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_PRIVATE_SALT: &str = "private-salt";
pub const ARG_KEY_POOL_SIZE: &str = "key-pool-size";
pub const ARG_KEY_BITS: &str = "key-bits";
pub const ARG_APPLY_PUBKEY_EXPIRE: &str = "apply-pubkey-expire";
pub const ARG_CREDENTIALS: &str = "credentials";
pub const ARG_PUBLIC_SALT: &str = "public-salt";
pub const ARG_HASH_ALGORITHMS: &str = "hash-algorithms";

/// Credential hashing and transport key options.
#[derive(Debug, Clone)]
pub struct Options {
    pub private_salt: SecretString,
    /// Ordered selection table; stored signatures depend on the order.
    pub algorithms: Vec<HashAlgorithm>,
    pub pool_size: usize,
    pub key_bits: usize,
    pub apply_pubkey_expire_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the private salt is missing or blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            private_salt: private_salt(matches)?,
            algorithms: algorithms(matches),
            pool_size: matches
                .get_one::<usize>(ARG_KEY_POOL_SIZE)
                .copied()
                .unwrap_or(DEFAULT_POOL_SIZE),
            key_bits: matches
                .get_one::<usize>(ARG_KEY_BITS)
                .copied()
                .unwrap_or(DEFAULT_KEY_BITS),
            apply_pubkey_expire_seconds: matches
                .get_one::<u64>(ARG_APPLY_PUBKEY_EXPIRE)
                .copied()
                .unwrap_or(DEFAULT_APPLY_PUBKEY_EXPIRE.as_secs()),
        })
    }

    #[must_use]
    pub fn config(&self) -> SecureConfig {
        SecureConfig::new(self.private_salt.clone())
            .with_algorithms(self.algorithms.clone())
            .with_pool_size(self.pool_size)
            .with_key_bits(self.key_bits)
            .with_apply_pubkey_expire(Duration::from_secs(self.apply_pubkey_expire_seconds))
    }
}

fn private_salt(matches: &ArgMatches) -> Result<SecretString> {
    matches
        .get_one::<String>(ARG_PRIVATE_SALT)
        .filter(|salt| !salt.trim().is_empty())
        .map(|salt| SecretString::from(salt.clone()))
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_PRIVATE_SALT}"))
}

fn algorithms(matches: &ArgMatches) -> Vec<HashAlgorithm> {
    matches
        .get_many::<HashAlgorithm>(ARG_HASH_ALGORITHMS)
        .map(|algorithms| algorithms.copied().collect())
        .unwrap_or_else(HashAlgorithm::defaults)
}

fn parse_algorithm(value: &str) -> Result<HashAlgorithm, String> {
    value.parse::<HashAlgorithm>().map_err(|err| err.to_string())
}

fn hash_algorithms_arg() -> Arg {
    Arg::new(ARG_HASH_ALGORITHMS)
        .long(ARG_HASH_ALGORITHMS)
        .help("Ordered, comma separated hash algorithms credentials are hashed with")
        .env("FASTCAS_HASH_ALGORITHMS")
        .default_value("MD5,SHA-256,SHA-384,SHA-512")
        .value_delimiter(',')
        .value_parser(parse_algorithm)
}

fn private_salt_arg() -> Arg {
    Arg::new(ARG_PRIVATE_SALT)
        .long(ARG_PRIVATE_SALT)
        .help("Server-wide private salt merged into every credential hash")
        .env("FASTCAS_PRIVATE_SALT")
        .hide_env_values(true)
        .required(true)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(private_salt_arg())
        .arg(hash_algorithms_arg())
        .arg(
            Arg::new(ARG_KEY_POOL_SIZE)
                .long(ARG_KEY_POOL_SIZE)
                .help("Number of RSA key pairs leased for credential transport")
                .env("FASTCAS_KEY_POOL_SIZE")
                .default_value("16")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_KEY_BITS)
                .long(ARG_KEY_BITS)
                .help("RSA modulus size in bits")
                .env("FASTCAS_KEY_BITS")
                .default_value("1024")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_APPLY_PUBKEY_EXPIRE)
                .long(ARG_APPLY_PUBKEY_EXPIRE)
                .help("Seconds a leased public key stays valid")
                .env("FASTCAS_APPLY_PUBKEY_EXPIRE")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Offline helper computing the stored signature of an account.
#[must_use]
pub fn signature_command() -> Command {
    Command::new("signature")
        .about("Compute the stored credential signature for an account")
        .arg(private_salt_arg())
        .arg(hash_algorithms_arg())
        .arg(
            Arg::new(ARG_CREDENTIALS)
                .long(ARG_CREDENTIALS)
                .help("Plaintext credentials of the account")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PUBLIC_SALT)
                .long(ARG_PUBLIC_SALT)
                .help("Hex public salt of the account (generated when omitted)"),
        )
}

/// Arguments of the `signature` subcommand.
#[derive(Debug, Clone)]
pub struct SignatureOptions {
    pub private_salt: SecretString,
    pub algorithms: Vec<HashAlgorithm>,
    pub credentials: SecretString,
    pub public_salt: Option<String>,
}

impl SignatureOptions {
    /// # Errors
    /// Returns an error if the private salt or credentials are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let credentials = matches
            .get_one::<String>(ARG_CREDENTIALS)
            .filter(|credentials| !credentials.is_empty())
            .map(|credentials| SecretString::from(credentials.clone()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_CREDENTIALS}"))?;
        Ok(Self {
            private_salt: private_salt(matches)?,
            algorithms: algorithms(matches),
            credentials,
            public_salt: matches
                .get_one::<String>(ARG_PUBLIC_SALT)
                .map(|salt| salt.trim().to_string())
                .filter(|salt| !salt.is_empty()),
        })
    }
}
