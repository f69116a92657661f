use super::{AuthError, AuthResponse, RequestContext};
use crate::secure::StoredCredentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Grants access to every registered application.
pub const ALL_APPLICATIONS: &str = "*";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub principal: String,
    #[serde(flatten)]
    pub stored: StoredCredentials,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Applications this account may sign into; empty means none.
    #[serde(default)]
    pub applications: Vec<String>,
}

/// A relying client registered with the authenticator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub base_uri: String,
}

impl Application {
    /// Ticket callback of this application.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/authenticator", self.base_uri.trim_end_matches('/'))
    }

    /// Whether `url` points inside this application.
    #[must_use]
    pub fn owns(&self, url: &str) -> bool {
        super::is_within(&self.base_uri, url)
    }
}

/// Account and application lookups plus URL decoration, supplied by the
/// hosting application.
#[async_trait]
pub trait SecurityConfigurer: Send + Sync {
    async fn find_account(&self, principal: &str) -> Result<Option<Account>, AuthError>;

    async fn find_application(&self, name: &str) -> Result<Option<Application>, AuthError>;

    async fn is_application_accessible(
        &self,
        principal: &str,
        application: &str,
    ) -> Result<bool, AuthError>;

    fn decorate_success_url(&self, url: String, _ctx: &RequestContext) -> String {
        url
    }

    fn decorate_failure_url(&self, url: String, _ctx: &RequestContext) -> String {
        url
    }
}

/// Observation points around authentication outcomes. Implementations may
/// veto a login up front or augment the response, never replace the outcome.
#[async_trait]
pub trait SecurityCoprocessor: Send + Sync {
    async fn pre_authenticate(
        &self,
        _ctx: &RequestContext,
        _principal: &str,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    fn on_success(
        &self,
        _ctx: &RequestContext,
        _principal: &str,
        response: AuthResponse,
    ) -> AuthResponse {
        response
    }

    fn on_failure(
        &self,
        _ctx: &RequestContext,
        _err: &AuthError,
        response: AuthResponse,
    ) -> AuthResponse {
        response
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCoprocessor;

impl SecurityCoprocessor for NoopCoprocessor {}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid registry: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct Registry {
    #[serde(default)]
    applications: Vec<Application>,
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Configurer backed by a JSON registry of applications and accounts.
#[derive(Clone, Debug, Default)]
pub struct StaticSecurityConfigurer {
    applications: HashMap<String, Application>,
    accounts: HashMap<String, Account>,
}

impl StaticSecurityConfigurer {
    /// # Errors
    /// Returns an error if `json` is not a valid registry document.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let registry: Registry = serde_json::from_str(json)?;
        Ok(Self {
            applications: registry
                .applications
                .into_iter()
                .map(|app| (app.name.clone(), app))
                .collect(),
            accounts: registry
                .accounts
                .into_iter()
                .map(|account| (account.principal.clone(), account))
                .collect(),
        })
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let configurer = Self::from_json(&json)?;
        info!(
            "Loaded registry {} ({} applications, {} accounts)",
            path.display(),
            configurer.applications.len(),
            configurer.accounts.len()
        );
        Ok(configurer)
    }

    #[must_use]
    pub fn with_application(mut self, application: Application) -> Self {
        self.applications
            .insert(application.name.clone(), application);
        self
    }

    #[must_use]
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.insert(account.principal.clone(), account);
        self
    }
}

#[async_trait]
impl SecurityConfigurer for StaticSecurityConfigurer {
    async fn find_account(&self, principal: &str) -> Result<Option<Account>, AuthError> {
        Ok(self.accounts.get(principal).cloned())
    }

    async fn find_application(&self, name: &str) -> Result<Option<Application>, AuthError> {
        Ok(self.applications.get(name).cloned())
    }

    async fn is_application_accessible(
        &self,
        principal: &str,
        application: &str,
    ) -> Result<bool, AuthError> {
        if !self.applications.contains_key(application) {
            debug!("unknown application {application}");
            return Ok(false);
        }
        Ok(self.accounts.get(principal).is_some_and(|account| {
            account
                .applications
                .iter()
                .any(|name| name == application || name == ALL_APPLICATIONS)
        }))
    }
}
