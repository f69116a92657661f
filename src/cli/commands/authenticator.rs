use super::{secure, server};
use crate::protocol::AUTHENTICATOR_COOKIE;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_REGISTRY: &str = "registry";
pub const ARG_FAILED_LOGIN_MAX: &str = "failed-login-max";
pub const ARG_FAILED_LOGIN_WINDOW: &str = "failed-login-window";

#[derive(Debug, Clone)]
pub struct Options {
    pub registry: PathBuf,
    pub failed_login_max: i64,
    pub failed_login_window_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the registry path is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            registry: matches
                .get_one::<PathBuf>(ARG_REGISTRY)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_REGISTRY}"))?,
            failed_login_max: matches
                .get_one::<i64>(ARG_FAILED_LOGIN_MAX)
                .copied()
                .unwrap_or(10),
            failed_login_window_seconds: matches
                .get_one::<u64>(ARG_FAILED_LOGIN_WINDOW)
                .copied()
                .unwrap_or(600),
        })
    }
}

/// The `authenticator` subcommand.
#[must_use]
pub fn command() -> Command {
    let command = Command::new("authenticator")
        .about("Run the central authenticator")
        .arg(
            Arg::new(ARG_REGISTRY)
                .short('r')
                .long(ARG_REGISTRY)
                .help("JSON file with the registered applications and accounts")
                .env("FASTCAS_REGISTRY")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_FAILED_LOGIN_MAX)
                .long(ARG_FAILED_LOGIN_MAX)
                .help("Failed logins tolerated per principal within the window")
                .env("FASTCAS_FAILED_LOGIN_MAX")
                .default_value("10")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_FAILED_LOGIN_WINDOW)
                .long(ARG_FAILED_LOGIN_WINDOW)
                .help("Failed login window in seconds")
                .env("FASTCAS_FAILED_LOGIN_WINDOW")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        );

    let command = server::with_args(command, "fastcas", "8080", AUTHENTICATOR_COOKIE);
    secure::with_args(command)
}
