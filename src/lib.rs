//! # fastcas
//!
//! CAS-style single sign-on. A central **authenticator** verifies credentials
//! and mints short-lived, single-use grant tickets; relying **clients** redeem
//! a ticket over the validation RPC and open their own local session.
//!
//! Every piece of shared state (sessions, ticket bindings, key-pair leases,
//! cumulator counters, the key-pair pool) lives in a namespaced cache behind
//! the [`cache`] interfaces, so nodes scale out without sticky sessions.
//!
//! ## Flow
//!
//! 1. A browser hits a protected client path and is redirected to
//!    `GET /login?service=..&redirect_url=..` on the authenticator.
//! 2. The login page leases a public key (`POST /secret/apply`) and submits
//!    the encrypted credentials (`POST /login`).
//! 3. The authenticator binds a grant ticket to its session and redirects
//!    back to the client callback with `grantTicket` and `principal`.
//! 4. The client redeems the ticket (`POST /validate`), rotates its session
//!    and returns the browser to the remembered URL.

pub mod api;
pub mod cache;
pub mod cli;
pub mod cumulator;
pub mod protocol;
pub mod secure;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
