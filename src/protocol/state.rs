use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session attribute holding the protocol state.
pub const KEY_PROTOCOL_STATE: &str = "protocol_state";

/// Where a session stands in the ticket protocol.
///
/// `Anonymous -> PendingRedirect -> AwaitingTicketValidation -> Authenticated
/// -> LoggedOut`. The authenticator only uses `Anonymous`, `Authenticated` and
/// `LoggedOut`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    #[default]
    Anonymous,
    PendingRedirect,
    AwaitingTicketValidation,
    Authenticated,
    LoggedOut,
}

impl ProtocolState {
    #[must_use]
    pub fn of(session: Option<&Session>, now_ms: i64) -> Self {
        session
            .and_then(|session| session.get::<Self>(KEY_PROTOCOL_STATE, now_ms))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::PendingRedirect => "pending_redirect",
            Self::AwaitingTicketValidation => "awaiting_ticket_validation",
            Self::Authenticated => "authenticated",
            Self::LoggedOut => "logged_out",
        }
    }

    /// Record `self` in the session.
    ///
    /// # Errors
    /// Returns an error if the state cannot be serialized.
    pub fn record(self, session: &mut Session, now_ms: i64) -> Result<(), serde_json::Error> {
        session.bind(KEY_PROTOCOL_STATE, &self, None, now_ms)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
