//! Ticket protocol engines.
//!
//! The authenticator verifies credentials and mints single-use grant tickets;
//! relying clients redeem those tickets over [`TicketValidator`] and keep
//! their own local session. Every request runs against an explicit
//! [`RequestContext`] and every step returns an [`AuthResponse`].

mod authenticator;
mod chain;
mod client;
mod config;
mod context;
mod error;
mod guard;
mod hooks;
mod response;
mod state;
mod validator;

pub use authenticator::{AuthenticatorEngine, GrantTicket};
pub use chain::{Chain, Flow, Middleware};
pub use client::{access_token, ClientEngine};
pub use config::{CookieConfig, ParamNames, ProtocolConfig, AUTHENTICATOR_COOKIE, CLIENT_COOKIE};
pub use context::RequestContext;
pub use error::{AuthError, RetCode};
pub use guard::{FailedLoginLock, GuardDecision, LoopGuard};
pub use hooks::{
    Account, Application, NoopCoprocessor, RegistryError, SecurityConfigurer,
    SecurityCoprocessor, StaticSecurityConfigurer, ALL_APPLICATIONS,
};
pub use response::{AuthResponse, Reply, RespBase};
pub use state::{ProtocolState, KEY_PROTOCOL_STATE};
pub use validator::{
    HttpTicketValidator, TicketValidateRequest, TicketValidateResult, TicketValidator,
    ValidateError,
};

// Session attributes
pub const KEY_PRINCIPAL: &str = "principal";
pub const KEY_ROLES: &str = "roles";
pub const KEY_PERMISSIONS: &str = "permissions";
pub const KEY_ATTRIBUTES: &str = "attributes";
pub const KEY_DATA_CIPHER_KEY: &str = "data_cipher_key";
pub const KEY_ACCESS_TOKEN_SIGN_KEY: &str = "access_token_sign_key";
pub const KEY_REMEMBER_URL: &str = "remember_redirect_url";
pub const KEY_GRANT_TICKET: &str = "grant_ticket";
pub const KEY_GRANTED_APPLICATIONS: &str = "granted_applications";

pub const SERVICE_ROLE_CLIENT: &str = "iam_client";
pub const SERVICE_ROLE_AUTHENTICATOR: &str = "iam_server";

/// Prefix of minted grant tickets.
pub const TICKET_PREFIX: &str = "ST-";

/// Append `pairs` to the query string of `base`.
fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        query.append_pair(name, value);
    }
    let query = query.finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

/// Whether `url` is `base` itself or a path, query or fragment below it.
fn is_within(base: &str, url: &str) -> bool {
    let base = base.trim_end_matches('/');
    url.strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
}
