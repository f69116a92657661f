use super::{
    with_query, Application, AuthError, AuthResponse, FailedLoginLock, ProtocolConfig,
    ProtocolState, RequestContext, RespBase, RetCode, SecurityConfigurer, SecurityCoprocessor,
    TicketValidateRequest, TicketValidateResult, KEY_ACCESS_TOKEN_SIGN_KEY, KEY_DATA_CIPHER_KEY,
    KEY_GRANTED_APPLICATIONS, KEY_PERMISSIONS, KEY_PRINCIPAL, KEY_ROLES,
    SERVICE_ROLE_AUTHENTICATOR, TICKET_PREFIX,
};
use crate::cache::{Cache, CacheKey, CacheManager};
use crate::cumulator::Cumulator;
use crate::secure::{CredentialsSecurer, CredentialsToken, CryptKind, SecureError};
use crate::session::{
    generate_token, now_ms, Session, SessionError, SessionStore, TicketBindingStore,
};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Issued ticket as recorded by the authenticator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTicket {
    pub ticket: String,
    pub principal: String,
    pub session_id: String,
    pub application: String,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

/// Central authenticator side of the ticket protocol.
#[derive(Clone)]
pub struct AuthenticatorEngine {
    config: Arc<ProtocolConfig>,
    sessions: SessionStore,
    bindings: TicketBindingStore,
    grants: Cache,
    securer: Arc<CredentialsSecurer>,
    configurer: Arc<dyn SecurityConfigurer>,
    coprocessor: Arc<dyn SecurityCoprocessor>,
    lock: FailedLoginLock,
}

impl AuthenticatorEngine {
    #[must_use]
    pub fn new(
        config: ProtocolConfig,
        caches: &CacheManager,
        securer: Arc<CredentialsSecurer>,
        configurer: Arc<dyn SecurityConfigurer>,
        coprocessor: Arc<dyn SecurityCoprocessor>,
    ) -> Self {
        let lock = FailedLoginLock::new(
            Cumulator::new(
                caches.cache("cumulators"),
                "failed_login",
                config.failed_login_window(),
            ),
            config.failed_login_max(),
        );
        Self {
            sessions: SessionStore::new(caches.cache("sessions"), config.session_timeout()),
            bindings: TicketBindingStore::new(caches.cache("tickets")),
            grants: caches.cache("grants"),
            config: Arc::new(config),
            securer,
            configurer,
            coprocessor,
            lock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    async fn load_session(&self, ctx: &RequestContext) -> Result<Option<Session>, AuthError> {
        match ctx.session_id(self.config.cookie().name(), &self.config.params().sid) {
            Some(id) => Ok(self.sessions.load(&id).await?),
            None => Ok(None),
        }
    }

    async fn application(&self, ctx: &RequestContext) -> Result<Application, AuthError> {
        let service = ctx
            .param(&self.config.params().service)
            .ok_or_else(|| AuthError::BadRequest("service is required".to_string()))?;
        self.configurer
            .find_application(service)
            .await?
            .ok_or_else(|| AuthError::BadRequest(format!("unknown application '{service}'")))
    }

    /// The requested `redirect_url` when it lies inside `app`, else the
    /// application's ticket callback.
    fn redirect_target(&self, ctx: &RequestContext, app: &Application) -> String {
        match ctx.param(&self.config.params().redirect_url) {
            Some(url) if app.owns(url) => url.to_string(),
            Some(url) => {
                warn!("ignoring redirect_url outside {}: {url}", app.name);
                app.callback_url()
            }
            None => app.callback_url(),
        }
    }

    fn session_descriptor(&self, session: &Session) -> serde_json::Value {
        json!({ "name": self.config.cookie().name(), "value": session.id() })
    }

    /// Mint a ticket for `session` and bind it before anyone can see it.
    async fn issue_ticket(
        &self,
        session: &Session,
        principal: &str,
        app: &Application,
    ) -> Result<String, AuthError> {
        let now = now_ms();
        let ttl = session.remaining(now);
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(AuthError::InvalidGrantTicket("session expired".to_string()));
        }
        let ticket = generate_token(TICKET_PREFIX)?;
        let grant = GrantTicket {
            ticket: ticket.clone(),
            principal: principal.to_string(),
            session_id: session.id().to_string(),
            application: app.name.clone(),
            created_at_ms: now,
            expires_at_ms: ttl.map(|ttl| {
                now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
            }),
        };
        let key = match ttl {
            Some(ttl) => CacheKey::new(&ticket).with_ttl(ttl),
            None => CacheKey::new(&ticket),
        };
        self.grants.put(&key, &grant).await?;
        self.bindings.bind(&ticket, session.id(), ttl).await?;
        debug!("issued grant ticket for {} to {}", principal, app.name);
        Ok(ticket)
    }

    /// Redirect (or JSON for API callers) back to `app` carrying a fresh
    /// ticket for the authenticated `session`.
    async fn grant(
        &self,
        ctx: &mut RequestContext,
        session: &Session,
        principal: &str,
        app: &Application,
    ) -> Result<AuthResponse, AuthError> {
        if !self
            .configurer
            .is_application_accessible(principal, &app.name)
            .await?
        {
            return Err(AuthError::Unauthorized(format!(
                "{principal} may not access {}",
                app.name
            )));
        }
        let ticket = self.issue_ticket(session, principal, app).await?;
        let params = self.config.params();
        let target = with_query(
            &self.redirect_target(ctx, app),
            &[
                (params.grant_ticket.as_str(), ticket.as_str()),
                (params.principal.as_str(), principal),
            ],
        );
        let target = self.configurer.decorate_success_url(target, ctx);

        ctx.cookies.push(self.config.cookie().session(session.id()));
        let response = if ctx.wants_json(&params.response_type) {
            let body = RespBase::ok(ProtocolState::Authenticated, "authenticated")
                .with(&params.redirect_url, &target)
                .with(&params.service, &app.name)
                .with("service_role", SERVICE_ROLE_AUTHENTICATOR)
                .with("session", self.session_descriptor(session));
            AuthResponse::json(StatusCode::OK, body)
        } else {
            AuthResponse::redirect(&target)
        };
        let response = response.with_cookies(ctx.cookies.drain(..));
        Ok(self.coprocessor.on_success(ctx, principal, response))
    }

    /// Render a protocol failure, handing it to the coprocessor first.
    fn failure(&self, ctx: &mut RequestContext, err: &AuthError) -> AuthResponse {
        let state = ProtocolState::of(ctx.session.as_ref(), now_ms());
        let response = AuthResponse::error(err, state).with_cookies(ctx.cookies.drain(..));
        self.coprocessor.on_failure(ctx, err, response)
    }

    fn finish(
        &self,
        ctx: &mut RequestContext,
        outcome: Result<AuthResponse, AuthError>,
    ) -> Result<AuthResponse, AuthError> {
        match outcome {
            Ok(response) => Ok(response),
            Err(err) if err.is_fault() => Err(err),
            Err(err) => {
                debug!("authentication failed: {err:?}");
                Ok(self.failure(ctx, &err))
            }
        }
    }

    /// `GET /login`. Already authenticated sessions get a ticket at once;
    /// everyone else is told how to log in.
    ///
    /// # Errors
    /// Only faults are returned; protocol failures become responses.
    #[instrument(skip_all)]
    pub async fn login_page(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let outcome = self.try_login_page(ctx).await;
        self.finish(ctx, outcome)
    }

    async fn try_login_page(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let app = self.application(ctx).await?;
        ctx.session = self.load_session(ctx).await?;
        let now = now_ms();
        let principal = ctx.session.as_ref().and_then(|session| {
            (ProtocolState::of(Some(session), now) == ProtocolState::Authenticated)
                .then(|| session.get::<String>(KEY_PRINCIPAL, now))
                .flatten()
        });

        if let (Some(principal), Some(session)) = (principal, ctx.session.clone()) {
            info!("single sign-on for {principal} into {}", app.name);
            return self.grant(ctx, &session, &principal, &app).await;
        }

        let params = self.config.params();
        let body = RespBase::new(
            RetCode::Unauthc,
            ProtocolState::of(ctx.session.as_ref(), now),
            "authentication required",
        )
        .with(&params.service, &app.name)
        .with(&params.redirect_url, self.redirect_target(ctx, &app))
        .with("service_role", SERVICE_ROLE_AUTHENTICATOR)
        .with("apply_secret_url", format!("{}/secret/apply", self.config.server_uri()))
        .with("login_url", self.config.login_url());
        Ok(AuthResponse::json(StatusCode::UNAUTHORIZED, body))
    }

    /// `POST /secret/apply`: lease a public key to the caller's session.
    ///
    /// # Errors
    /// Only faults are returned; protocol failures become responses.
    #[instrument(skip_all)]
    pub async fn apply_secret(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let outcome = self.try_apply_secret(ctx).await;
        self.finish(ctx, outcome)
    }

    async fn try_apply_secret(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let kind = self.crypt_kind(ctx)?;
        let mut session = match self.load_session(ctx).await? {
            Some(session) => session,
            None => self.sessions.create().await?,
        };
        let secret = self.securer.apply_secret(&mut session, kind).await?;
        self.sessions.save(&session).await?;
        ctx.cookies.push(self.config.cookie().session(session.id()));

        let state = ProtocolState::of(Some(&session), now_ms());
        let body = RespBase::ok(state, "ok")
            .with("secret", &secret)
            .with(&self.config.params().crypt_kind, kind)
            .with("session", self.session_descriptor(&session));
        ctx.session = Some(session);
        Ok(AuthResponse::json(StatusCode::OK, body).with_cookies(ctx.cookies.drain(..)))
    }

    fn crypt_kind(&self, ctx: &RequestContext) -> Result<CryptKind, AuthError> {
        match ctx.param(&self.config.params().crypt_kind) {
            Some(kind) => kind
                .parse()
                .map_err(|_| AuthError::BadRequest(format!("unsupported kind '{kind}'"))),
            None => Ok(CryptKind::Rsa),
        }
    }

    /// `POST /login`: verify credentials and hand a ticket to the
    /// requesting application.
    ///
    /// # Errors
    /// Only faults are returned; protocol failures become responses.
    #[instrument(skip_all)]
    pub async fn login(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let outcome = self.try_login(ctx).await;
        self.finish(ctx, outcome)
    }

    async fn try_login(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let params = self.config.params().clone();
        let principal = ctx
            .param(&params.principal)
            .map(str::to_string)
            .ok_or_else(|| AuthError::BadRequest("principal is required".to_string()))?;
        let app = self.application(ctx).await?;

        if self.lock.is_locked(&principal).await? {
            warn!("login locked for {principal}");
            return Err(AuthError::TooManyRequests);
        }
        self.coprocessor.pre_authenticate(ctx, &principal).await?;

        // Without a session there is no leased key to decrypt with.
        let mut session = self
            .load_session(ctx)
            .await?
            .ok_or(AuthError::SecretExpired)?;
        let credentials = ctx
            .param(&params.credentials)
            .ok_or(AuthError::InvalidCredentials)?;
        let token = CredentialsToken::encrypted(&principal, credentials, self.crypt_kind(ctx)?);

        let account = self.configurer.find_account(&principal).await?;
        let verified = match &account {
            Some(account) => {
                self.securer
                    .validate(&mut session, token, &account.stored)
                    .await
            }
            // Spend the lease all the same.
            None => match self.securer.resolve(&mut session, token).await {
                Ok(_) | Err(SecureError::InvalidCredentials) => Ok(false),
                Err(err) => Err(err),
            },
        };
        // The lease is gone either way.
        self.sessions.save(&session).await?;

        let account = match (verified.map_err(AuthError::from), account) {
            (Ok(true), Some(account)) => account,
            (Ok(_), _) | (Err(AuthError::InvalidCredentials), _) => {
                let failures = self.lock.record_failure(&principal).await?;
                info!("invalid credentials for {principal} ({failures} failures)");
                ctx.session = Some(session);
                return Err(AuthError::InvalidCredentials);
            }
            (Err(err), _) => {
                ctx.session = Some(session);
                return Err(err);
            }
        };
        self.lock.reset(&principal).await?;
        if !self
            .configurer
            .is_application_accessible(&principal, &app.name)
            .await?
        {
            ctx.session = Some(session);
            return Err(AuthError::Unauthorized(format!(
                "{principal} may not access {}",
                app.name
            )));
        }

        // Rotate the session id on login.
        let now = now_ms();
        let mut authenticated = self.sessions.create().await?;
        authenticated.bind(KEY_PRINCIPAL, &principal, None, now)?;
        authenticated.bind(KEY_ROLES, &account.roles, None, now)?;
        authenticated.bind(KEY_PERMISSIONS, &account.permissions, None, now)?;
        ProtocolState::Authenticated.record(&mut authenticated, now)?;
        self.sessions.save(&authenticated).await?;
        if let Err(err) = self.sessions.invalidate(session.id()).await {
            debug!("pre-login session already gone: {err}");
        }
        info!("{principal} authenticated");

        ctx.session = Some(authenticated.clone());
        self.grant(ctx, &authenticated, &principal, &app).await
    }

    /// `POST /validate`: redeem a ticket for the application it was issued to.
    ///
    /// # Errors
    /// [`AuthError::InvalidGrantTicket`] for unknown, spent or foreign
    /// tickets, [`AuthError::Unauthorized`] when access was revoked, plus
    /// faults.
    #[instrument(skip_all, fields(application = %request.application))]
    pub async fn validate(
        &self,
        request: &TicketValidateRequest,
    ) -> Result<TicketValidateResult, AuthError> {
        let invalid = |detail: &str| AuthError::InvalidGrantTicket(detail.to_string());
        let ticket = request.ticket.trim();
        if ticket.is_empty() {
            return Err(invalid("grant ticket is missing"));
        }

        let session_id = self
            .bindings
            .session_of(ticket)
            .await?
            .ok_or_else(|| invalid("unknown or expired ticket"))?;
        let grant: GrantTicket = self
            .grants
            .get(&CacheKey::new(ticket))
            .await?
            .filter(|grant: &GrantTicket| grant.session_id == session_id)
            .ok_or_else(|| invalid("unknown or expired ticket"))?;
        if grant.application != request.application {
            warn!(
                "ticket for {} presented by {}",
                grant.application, request.application
            );
            return Err(invalid("ticket was issued to another application"));
        }
        if !self.bindings.consume(ticket).await? {
            return Err(invalid("ticket already used"));
        }

        let result = self.redeem(&session_id, &grant).await;
        self.bindings.unbind(ticket).await?;
        self.grants.remove(&CacheKey::new(ticket)).await?;
        result
    }

    async fn redeem(
        &self,
        session_id: &str,
        grant: &GrantTicket,
    ) -> Result<TicketValidateResult, AuthError> {
        let mut session = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| AuthError::InvalidGrantTicket("session expired".to_string()))?;
        let now = now_ms();
        let principal = session
            .get::<String>(KEY_PRINCIPAL, now)
            .filter(|principal| *principal == grant.principal)
            .ok_or_else(|| AuthError::InvalidGrantTicket("session changed owner".to_string()))?;
        if !self
            .configurer
            .is_application_accessible(&principal, &grant.application)
            .await?
        {
            return Err(AuthError::Unauthorized(format!(
                "{principal} may not access {}",
                grant.application
            )));
        }

        let data_cipher_key = self.session_key(&mut session, KEY_DATA_CIPHER_KEY, now)?;
        let access_token_sign_key =
            self.session_key(&mut session, KEY_ACCESS_TOKEN_SIGN_KEY, now)?;
        let mut granted: Vec<String> = session
            .get(KEY_GRANTED_APPLICATIONS, now)
            .unwrap_or_default();
        if !granted.contains(&grant.application) {
            granted.push(grant.application.clone());
        }
        session.bind(KEY_GRANTED_APPLICATIONS, &granted, None, now)?;
        self.sessions.save(&session).await?;

        let account = self
            .configurer
            .find_account(&principal)
            .await?
            .unwrap_or_default();
        info!("ticket of {principal} redeemed by {}", grant.application);
        Ok(TicketValidateResult {
            principal,
            roles: account.roles,
            permissions: account.permissions,
            attributes: account.attributes,
            data_cipher_key,
            access_token_sign_key,
            valid_until_ms: session
                .remaining(now)
                .and_then(|ttl| i64::try_from(ttl.as_millis()).ok())
                .map(|ttl| now.saturating_add(ttl)),
        })
    }

    /// Per-session random key, created on first use.
    fn session_key(&self, session: &mut Session, name: &str, now: i64) -> Result<String, AuthError> {
        if let Some(key) = session.get::<String>(name, now) {
            return Ok(key);
        }
        let key = generate_token("")?;
        session.bind(name, &key, None, now)?;
        Ok(key)
    }

    /// `POST /logout`: close the authenticator session and its ticket.
    ///
    /// # Errors
    /// Returns faults such as an unavailable cache.
    #[instrument(skip_all)]
    pub async fn logout(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let cookie = self.config.cookie();
        let mut signed_out = Vec::new();
        if let Some(id) = ctx.session_id(cookie.name(), &self.config.params().sid) {
            if let Some(session) = self.sessions.load(&id).await? {
                signed_out = session
                    .get::<Vec<String>>(KEY_GRANTED_APPLICATIONS, now_ms())
                    .unwrap_or_default();
            }
            self.bindings.unbind_session(&id).await?;
            match self.sessions.invalidate(&id).await {
                Ok(()) => info!("authenticator session closed, signed out of {signed_out:?}"),
                Err(SessionError::AlreadyInvalid(_)) => {
                    warn!("logout for a session that is already invalid");
                }
                Err(err) => return Err(err.into()),
            }
        }
        ctx.session = None;
        ctx.cookies.push(cookie.clear(cookie.name()));

        let target = match self.application(ctx).await {
            Ok(app) => Some(self.redirect_target(ctx, &app)),
            Err(_) => None,
        };
        let response = match target {
            Some(target) if !ctx.wants_json(&self.config.params().response_type) => {
                AuthResponse::redirect(&target)
            }
            target => {
                let mut body = RespBase::ok(ProtocolState::LoggedOut, "logged out")
                    .with("applications", &signed_out);
                if let Some(target) = target {
                    body = body.with(&self.config.params().redirect_url, target);
                }
                AuthResponse::json(StatusCode::OK, body)
            }
        };
        Ok(response.with_cookies(ctx.cookies.drain(..)))
    }
}
