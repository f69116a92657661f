use super::server;
use crate::protocol::CLIENT_COOKIE;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_SERVER_URI: &str = "server-uri";
pub const ARG_SUCCESS_URI: &str = "success-uri";
pub const ARG_VALIDATE_TIMEOUT: &str = "validate-timeout";
pub const ARG_TRY_REDIRECT_MAX: &str = "try-redirect-max";
pub const ARG_TRY_REDIRECT_WINDOW: &str = "try-redirect-window";
pub const ARG_ACCESS_TOKEN_MAX_AGE: &str = "access-token-max-age";

#[derive(Debug, Clone)]
pub struct Options {
    pub server_uri: String,
    pub success_uri: String,
    pub validate_timeout_seconds: u64,
    pub try_redirect_max: i64,
    pub try_redirect_window_seconds: u64,
    pub access_token_max_age_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the authenticator URL is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            server_uri: matches
                .get_one::<String>(ARG_SERVER_URI)
                .cloned()
                .filter(|uri| !uri.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_SERVER_URI}"))?,
            success_uri: matches
                .get_one::<String>(ARG_SUCCESS_URI)
                .cloned()
                .unwrap_or_else(|| "/".to_string()),
            validate_timeout_seconds: matches
                .get_one::<u64>(ARG_VALIDATE_TIMEOUT)
                .copied()
                .unwrap_or(3),
            try_redirect_max: matches
                .get_one::<i64>(ARG_TRY_REDIRECT_MAX)
                .copied()
                .unwrap_or(5),
            try_redirect_window_seconds: matches
                .get_one::<u64>(ARG_TRY_REDIRECT_WINDOW)
                .copied()
                .unwrap_or(10),
            access_token_max_age_seconds: matches
                .get_one::<u64>(ARG_ACCESS_TOKEN_MAX_AGE)
                .copied()
                .unwrap_or(300),
        })
    }
}

/// The `client` subcommand.
#[must_use]
pub fn command() -> Command {
    let command = Command::new("client")
        .about("Run a relying client protecting every path behind the authenticator")
        .arg(
            Arg::new(ARG_SERVER_URI)
                .short('s')
                .long(ARG_SERVER_URI)
                .help("Base URL of the authenticator")
                .env("FASTCAS_SERVER_URI")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SUCCESS_URI)
                .long(ARG_SUCCESS_URI)
                .help("Path to land on after login when nothing was remembered")
                .env("FASTCAS_SUCCESS_URI")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_VALIDATE_TIMEOUT)
                .long(ARG_VALIDATE_TIMEOUT)
                .help("Ticket validation timeout in seconds")
                .env("FASTCAS_VALIDATE_TIMEOUT")
                .default_value("3")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRY_REDIRECT_MAX)
                .long(ARG_TRY_REDIRECT_MAX)
                .help("Failed ticket round trips tolerated within the window")
                .env("FASTCAS_TRY_REDIRECT_MAX")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TRY_REDIRECT_WINDOW)
                .long(ARG_TRY_REDIRECT_WINDOW)
                .help("Ticket round trip window in seconds")
                .env("FASTCAS_TRY_REDIRECT_WINDOW")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_MAX_AGE)
                .long(ARG_ACCESS_TOKEN_MAX_AGE)
                .help("Max-Age of the browser access token cookie in seconds")
                .env("FASTCAS_ACCESS_TOKEN_MAX_AGE")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        );

    server::with_args(command, "portal", "8081", CLIENT_COOKIE)
}
