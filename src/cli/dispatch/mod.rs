//! Maps validated CLI matches to the action to execute.

use crate::cli::actions::{authenticator, client, signature, Action};
use crate::cli::commands::{self, secure::SignatureOptions, server};
use anyhow::{anyhow, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("authenticator", sub)) => Ok(Action::Authenticator(authenticator::Args {
            server: server::Options::parse(sub)?,
            authenticator: commands::authenticator::Options::parse(sub)?,
            secure: commands::secure::Options::parse(sub)?,
        })),
        Some(("client", sub)) => Ok(Action::Client(client::Args {
            server: server::Options::parse(sub)?,
            client: commands::client::Options::parse(sub)?,
        })),
        Some(("signature", sub)) => Ok(Action::Signature(signature::Args {
            options: SignatureOptions::parse(sub)?,
        })),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{AUTHENTICATOR_COOKIE, CLIENT_COOKIE},
        secure::HashAlgorithm,
    };
    use secrecy::ExposeSecret;

    #[test]
    fn authenticator_action() -> Result<()> {
        temp_env::with_vars(
            [
                ("FASTCAS_PORT", None::<&str>),
                ("FASTCAS_CACHE_PREFIX", None),
                ("FASTCAS_COOKIE_NAME", None),
                ("FASTCAS_HASH_ALGORITHMS", Some("SHA-256,SHA-512")),
                ("FASTCAS_FAILED_LOGIN_MAX", Some("4")),
            ],
            || {
                let matches = commands::new().try_get_matches_from(vec![
                    "fastcas",
                    "authenticator",
                    "--base-uri",
                    "https://sso.tld",
                    "--registry",
                    "/tmp/registry.json",
                    "--private-salt",
                    "salt",
                ])?;
                let Action::Authenticator(args) = handler(&matches)? else {
                    return Err(anyhow!("expected the authenticator action"));
                };
                assert_eq!(args.server.port, 8080);
                assert_eq!(args.server.cache_prefix, "fastcas");
                assert_eq!(args.authenticator.failed_login_max, 4);
                assert_eq!(args.secure.private_salt.expose_secret(), "salt");
                assert_eq!(
                    args.secure.algorithms,
                    vec![HashAlgorithm::Sha256, HashAlgorithm::Sha512]
                );
                assert_eq!(args.protocol_config().cookie().name(), AUTHENTICATOR_COOKIE);
                Ok(())
            },
        )
    }

    #[test]
    fn client_action() -> Result<()> {
        temp_env::with_vars(
            [
                ("FASTCAS_PORT", None::<&str>),
                ("FASTCAS_SERVICE", None),
                ("FASTCAS_COOKIE_NAME", None),
                ("FASTCAS_ACCESS_TOKEN_MAX_AGE", None),
            ],
            || {
                let matches = commands::new().try_get_matches_from(vec![
                    "fastcas",
                    "client",
                    "--server-uri",
                    "https://sso.tld",
                    "--base-uri",
                    "https://portal.tld",
                ])?;
                let Action::Client(args) = handler(&matches)? else {
                    return Err(anyhow!("expected the client action"));
                };
                assert_eq!(args.server.port, 8081);
                assert_eq!(args.server.service, "portal");
                assert_eq!(args.client.server_uri, "https://sso.tld");
                assert_eq!(args.client.access_token_max_age_seconds, 300);
                assert_eq!(args.protocol_config().cookie().name(), CLIENT_COOKIE);
                Ok(())
            },
        )
    }

    #[test]
    fn blank_private_salt_is_rejected() -> Result<()> {
        let matches = commands::new().try_get_matches_from(vec![
            "fastcas",
            "signature",
            "--private-salt",
            "  ",
            "--credentials",
            "secret",
        ])?;
        assert!(handler(&matches).is_err());
        Ok(())
    }
}
