use crate::protocol::CookieConfig;
use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_SERVICE: &str = "service";
pub const ARG_BASE_URI: &str = "base-uri";
pub const ARG_SESSION_TIMEOUT: &str = "session-timeout";
pub const ARG_CACHE_PREFIX: &str = "cache-prefix";
pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_MAX_AGE: &str = "cookie-max-age";

/// Options shared by both HTTP services.
#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub service: String,
    pub base_uri: String,
    pub session_timeout_seconds: u64,
    pub cache_prefix: String,
    pub cookie_name: String,
    pub cookie_secure: bool,
    /// `None` keeps the session cookie for the browser session only.
    pub cookie_max_age_seconds: Option<i64>,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing or blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            service: read_required(ARG_SERVICE)?,
            base_uri: read_required(ARG_BASE_URI)?,
            session_timeout_seconds: matches
                .get_one::<u64>(ARG_SESSION_TIMEOUT)
                .copied()
                .unwrap_or(1800),
            cache_prefix: read_required(ARG_CACHE_PREFIX)?,
            cookie_name: read_required(ARG_COOKIE_NAME)?,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            cookie_max_age_seconds: matches.get_one::<i64>(ARG_COOKIE_MAX_AGE).copied(),
        })
    }

    /// Attributes of the session cookie this node sets.
    #[must_use]
    pub fn cookie(&self) -> CookieConfig {
        CookieConfig::new(&self.cookie_name)
            .with_secure(self.cookie_secure)
            .with_max_age(self.cookie_max_age_seconds)
    }
}

#[must_use]
pub fn with_args(
    command: Command,
    service: &'static str,
    port: &'static str,
    cookie: &'static str,
) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value(port)
                .env("FASTCAS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SERVICE)
                .long(ARG_SERVICE)
                .help("Application name of this node")
                .default_value(service)
                .env("FASTCAS_SERVICE"),
        )
        .arg(
            Arg::new(ARG_BASE_URI)
                .short('b')
                .long(ARG_BASE_URI)
                .help("Public URL this node is reached at")
                .env("FASTCAS_BASE_URI")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TIMEOUT)
                .long(ARG_SESSION_TIMEOUT)
                .help("Idle session timeout in seconds")
                .default_value("1800")
                .env("FASTCAS_SESSION_TIMEOUT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CACHE_PREFIX)
                .long(ARG_CACHE_PREFIX)
                .help("Namespace prefix of every cache key")
                .default_value("fastcas")
                .env("FASTCAS_CACHE_PREFIX"),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Name of the session cookie")
                .default_value(cookie)
                .env("FASTCAS_COOKIE_NAME"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Only send cookies over HTTPS")
                .env("FASTCAS_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_COOKIE_MAX_AGE)
                .long(ARG_COOKIE_MAX_AGE)
                .help("Session cookie Max-Age in seconds (browser session when unset)")
                .env("FASTCAS_COOKIE_MAX_AGE")
                .value_parser(clap::value_parser!(i64)),
        )
}
