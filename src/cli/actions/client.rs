use crate::{
    api,
    cache::CacheManager,
    cli::actions::log_entries,
    cli::commands::{client, server},
    protocol::{
        ClientEngine, HttpTicketValidator, NoopCoprocessor, ProtocolConfig,
        StaticSecurityConfigurer,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct Args {
    pub server: server::Options,
    pub client: client::Options,
}

impl Args {
    /// Protocol settings of the relying client.
    #[must_use]
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig::new(
            &self.server.service,
            &self.client.server_uri,
            &self.server.base_uri,
        )
        .with_success_uri(&self.client.success_uri)
        .with_cookie(self.server.cookie())
        .with_session_timeout(Duration::from_secs(self.server.session_timeout_seconds))
        .with_access_token_ttl(Duration::from_secs(self.client.access_token_max_age_seconds))
        .with_validate_timeout(Duration::from_secs(self.client.validate_timeout_seconds))
        .with_try_redirect(
            self.client.try_redirect_max,
            Duration::from_secs(self.client.try_redirect_window_seconds),
        )
    }
}

/// Execute the client action.
/// # Errors
/// Returns an error if the validation client cannot be built or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = args.protocol_config();
    let caches = CacheManager::in_memory(&args.server.cache_prefix);
    let validator = HttpTicketValidator::new(&config.validate_url(), config.validate_timeout())
        .context("Could not build the ticket validator")?;

    let engine = ClientEngine::new(
        config,
        &caches,
        Arc::new(validator),
        Arc::new(StaticSecurityConfigurer::default()),
        Arc::new(NoopCoprocessor),
    );

    api::new(args.server.port, api::client_router(Arc::new(engine), caches)).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.server.port)),
        ("service", args.server.service.clone()),
        ("base_uri", args.server.base_uri.clone()),
        ("server_uri", args.client.server_uri.clone()),
        ("success_uri", args.client.success_uri.clone()),
        ("cache_prefix", args.server.cache_prefix.clone()),
        (
            "validate_timeout",
            format!("{}s", args.client.validate_timeout_seconds),
        ),
        (
            "try_redirect",
            format!(
                "{} per {}s",
                args.client.try_redirect_max, args.client.try_redirect_window_seconds
            ),
        ),
    ];
    log_entries("Client configuration", &entries);
}
