use crate::{
    api,
    cache::CacheManager,
    cli::actions::log_entries,
    cli::commands::{authenticator, secure, server},
    protocol::{AuthenticatorEngine, NoopCoprocessor, ProtocolConfig, StaticSecurityConfigurer},
    secure::CredentialsSecurer,
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct Args {
    pub server: server::Options,
    pub authenticator: authenticator::Options,
    pub secure: secure::Options,
}

impl Args {
    /// Protocol settings of the authenticator node.
    #[must_use]
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig::new(
            &self.server.service,
            &self.server.base_uri,
            &self.server.base_uri,
        )
        .with_cookie(self.server.cookie())
        .with_session_timeout(Duration::from_secs(self.server.session_timeout_seconds))
        .with_failed_login(
            self.authenticator.failed_login_max,
            Duration::from_secs(self.authenticator.failed_login_window_seconds),
        )
    }
}

/// Execute the authenticator action.
/// # Errors
/// Returns an error if the registry cannot be loaded, the secure settings are
/// invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let caches = CacheManager::in_memory(&args.server.cache_prefix);
    let securer = CredentialsSecurer::new(args.secure.config(), &caches)
        .context("Invalid credential settings")?;
    let configurer = StaticSecurityConfigurer::load(&args.authenticator.registry)
        .context("Could not load the registry")?;

    let engine = AuthenticatorEngine::new(
        args.protocol_config(),
        &caches,
        Arc::new(securer),
        Arc::new(configurer),
        Arc::new(NoopCoprocessor),
    );

    api::new(
        args.server.port,
        api::authenticator_router(Arc::new(engine), caches),
    )
    .await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.server.port)),
        ("service", args.server.service.clone()),
        ("base_uri", args.server.base_uri.clone()),
        ("registry", args.authenticator.registry.display().to_string()),
        ("cache_prefix", args.server.cache_prefix.clone()),
        (
            "session_timeout",
            format!("{}s", args.server.session_timeout_seconds),
        ),
        (
            "failed_login",
            format!(
                "{} per {}s",
                args.authenticator.failed_login_max,
                args.authenticator.failed_login_window_seconds
            ),
        ),
        (
            "key_pool",
            format!("{} x {} bits", args.secure.pool_size, args.secure.key_bits),
        ),
    ];
    log_entries("Authenticator configuration", &entries);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::HashAlgorithm;
    use secrecy::SecretString;
    use std::path::PathBuf;

    #[test]
    fn protocol_config_follows_options() {
        let args = Args {
            server: server::Options {
                port: 8080,
                service: "fastcas".to_string(),
                base_uri: "https://sso.tld/".to_string(),
                session_timeout_seconds: 60,
                cache_prefix: "fastcas".to_string(),
                cookie_name: "SSO".to_string(),
                cookie_secure: true,
                cookie_max_age_seconds: Some(3600),
            },
            authenticator: authenticator::Options {
                registry: PathBuf::from("/tmp/registry.json"),
                failed_login_max: 3,
                failed_login_window_seconds: 30,
            },
            secure: secure::Options {
                private_salt: SecretString::from("salt"),
                algorithms: HashAlgorithm::defaults(),
                pool_size: 2,
                key_bits: 512,
                apply_pubkey_expire_seconds: 60,
            },
        };
        let config = args.protocol_config();
        assert_eq!(config.base_uri(), "https://sso.tld");
        assert_eq!(config.server_uri(), "https://sso.tld");
        assert_eq!(config.session_timeout(), Duration::from_secs(60));
        assert_eq!(config.failed_login_max(), 3);
        assert_eq!(config.failed_login_window(), Duration::from_secs(30));
        assert_eq!(
            config.cookie().session("id"),
            "SSO=id; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600; Secure"
        );
    }
}
