use super::{
    is_within, with_query, AuthError, AuthResponse, Chain, Flow, GuardDecision, LoopGuard, Middleware,
    ProtocolConfig, ProtocolState, RequestContext, RespBase, RetCode, SecurityConfigurer,
    SecurityCoprocessor, TicketValidateRequest, TicketValidateResult, TicketValidator,
    KEY_ACCESS_TOKEN_SIGN_KEY, KEY_ATTRIBUTES, KEY_DATA_CIPHER_KEY, KEY_GRANT_TICKET,
    KEY_PERMISSIONS, KEY_PRINCIPAL, KEY_REMEMBER_URL, KEY_ROLES, SERVICE_ROLE_CLIENT,
};
use crate::cache::CacheManager;
use crate::cumulator::Cumulator;
use crate::session::{
    generate_token, now_ms, Session, SessionError, SessionStore, TicketBindingStore,
};
use async_trait::async_trait;
use axum::http::{header::HeaderName, Method, StatusCode};
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Hex HMAC-SHA256 of `session_id` under the per-session sign key.
///
/// # Errors
/// Returns an error if the key is rejected by the MAC.
pub fn access_token(sign_key: &str, session_id: &str) -> Result<String, AuthError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(sign_key.as_bytes())
        .map_err(|err| AuthError::Configuration(err.to_string()))?;
    mac.update(session_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the way back to the authenticator for callers without a session.
#[derive(Clone)]
struct Redirector {
    config: Arc<ProtocolConfig>,
    sessions: SessionStore,
    configurer: Arc<dyn SecurityConfigurer>,
}

impl Redirector {
    /// Login URL carrying the service and the callback that keeps `query`.
    fn login_url(&self, ctx: &RequestContext, query: Option<&str>) -> String {
        let params = self.config.params();
        let url = with_query(
            &self.config.login_url(),
            &[
                (params.service.as_str(), self.config.service()),
                (
                    params.redirect_url.as_str(),
                    &self.config.callback_url(query),
                ),
            ],
        );
        self.configurer.decorate_failure_url(url, ctx)
    }

    /// Redirect (or JSON envelope) to the authenticator.
    fn respond(
        &self,
        ctx: &mut RequestContext,
        query: Option<&str>,
        code: RetCode,
        message: &str,
    ) -> AuthResponse {
        let url = self.login_url(ctx, query);
        let state = ProtocolState::of(ctx.session.as_ref(), now_ms());
        let response = if ctx.wants_json(&self.config.params().response_type) {
            let body = RespBase::new(code, state, message)
                .with(&self.config.params().redirect_url, &url)
                .with(&self.config.params().service, self.config.service())
                .with("service_role", SERVICE_ROLE_CLIENT);
            AuthResponse::json(code.status(), body)
        } else {
            AuthResponse::redirect(&url)
        };
        response.with_cookies(ctx.cookies.drain(..))
    }

    /// First arrival without an authenticated session. Browsers get the
    /// requested URL remembered so the login can return to it.
    async fn unauthenticated(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let url = ctx.request_url(self.config.base_uri());
        let remember = ctx.method == Method::GET
            && ctx.is_browser()
            && !ctx.is_xhr()
            && self.config.rememberable(&url);
        if remember {
            let now = now_ms();
            let mut session = match ctx.session.take() {
                Some(session) => session,
                None => {
                    let session = self.sessions.create().await?;
                    ctx.cookies.push(self.config.cookie().session(session.id()));
                    session
                }
            };
            session.bind(KEY_REMEMBER_URL, &url, None, now)?;
            ProtocolState::PendingRedirect.record(&mut session, now)?;
            self.sessions.save(&session).await?;
            debug!("remembered {url}");
            ctx.session = Some(session);
        }
        let query = ctx.query.clone();
        Ok(self.respond(
            ctx,
            query.as_deref(),
            RetCode::Unauthc,
            "authentication required",
        ))
    }
}

/// Loads the local session named by the client cookie.
struct SessionLoader {
    config: Arc<ProtocolConfig>,
    sessions: SessionStore,
}

#[async_trait]
impl Middleware for SessionLoader {
    fn name(&self) -> &'static str {
        "session_loader"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Flow, AuthError> {
        if ctx.session.is_none() {
            if let Some(id) = ctx.session_id(self.config.cookie().name(), &self.config.params().sid)
            {
                ctx.session = self.sessions.load(&id).await?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Lets authenticated sessions through and sends everyone else to log in.
struct AuthenticatedGate {
    redirector: Redirector,
}

#[async_trait]
impl Middleware for AuthenticatedGate {
    fn name(&self) -> &'static str {
        "authenticated_gate"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Flow, AuthError> {
        let now = now_ms();
        let authenticated = ctx.session.as_ref().is_some_and(|session| {
            ProtocolState::of(Some(session), now) == ProtocolState::Authenticated
                && session.get::<String>(KEY_PRINCIPAL, now).is_some()
        });
        if authenticated {
            return Ok(Flow::Continue);
        }
        Ok(Flow::Respond(self.redirector.unauthenticated(ctx).await?))
    }
}

/// Relying client side of the ticket protocol.
#[derive(Clone)]
pub struct ClientEngine {
    config: Arc<ProtocolConfig>,
    sessions: SessionStore,
    bindings: TicketBindingStore,
    validator: Arc<dyn TicketValidator>,
    coprocessor: Arc<dyn SecurityCoprocessor>,
    configurer: Arc<dyn SecurityConfigurer>,
    guard: LoopGuard,
    redirector: Redirector,
    chain: Chain,
}

impl ClientEngine {
    #[must_use]
    pub fn new(
        config: ProtocolConfig,
        caches: &CacheManager,
        validator: Arc<dyn TicketValidator>,
        configurer: Arc<dyn SecurityConfigurer>,
        coprocessor: Arc<dyn SecurityCoprocessor>,
    ) -> Self {
        let config = Arc::new(config);
        let sessions = SessionStore::new(caches.cache("client_sessions"), config.session_timeout());
        let guard = LoopGuard::new(
            Cumulator::new(
                caches.cache("cumulators"),
                "try_redirect",
                config.try_redirect_window(),
            ),
            config.try_redirect_max(),
        );
        let redirector = Redirector {
            config: config.clone(),
            sessions: sessions.clone(),
            configurer: configurer.clone(),
        };
        let chain = Chain::new()
            .with(Arc::new(SessionLoader {
                config: config.clone(),
                sessions: sessions.clone(),
            }))
            .with(Arc::new(AuthenticatedGate {
                redirector: redirector.clone(),
            }));
        Self {
            config,
            sessions,
            bindings: TicketBindingStore::new(caches.cache("client_tickets")),
            validator,
            coprocessor,
            configurer,
            guard,
            redirector,
            chain,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    #[must_use]
    pub fn permits_url(&self) -> String {
        format!("{}/permits", self.config.base_uri())
    }

    /// Run the protected-resource chain. `Flow::Continue` leaves the
    /// authenticated session in `ctx.session`.
    ///
    /// # Errors
    /// Returns faults such as an unavailable cache.
    pub async fn protect(&self, ctx: &mut RequestContext) -> Result<Flow, AuthError> {
        self.chain.run(ctx).await
    }

    /// Ticket callback: redeem the grant ticket and open the local session.
    ///
    /// # Errors
    /// Only faults are returned; protocol failures become responses.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        match self.redeem(ctx).await {
            Ok((session, remembered)) => self.on_success(ctx, &session, remembered),
            Err(err) if err.is_fault() => Err(err),
            Err(err) => self.on_failure(ctx, err).await,
        }
    }

    async fn load_session(&self, ctx: &RequestContext) -> Result<Option<Session>, AuthError> {
        match ctx.session_id(self.config.cookie().name(), &self.config.params().sid) {
            Some(id) => Ok(self.sessions.load(&id).await?),
            None => Ok(None),
        }
    }

    async fn redeem(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(Session, Option<String>), AuthError> {
        ctx.session = self.load_session(ctx).await?;
        let ticket = ctx
            .param(&self.config.params().grant_ticket)
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidGrantTicket("grant ticket is missing".to_string()))?;

        let mut remembered = None;
        if let Some(session) = ctx.session.as_mut() {
            let now = now_ms();
            remembered = session.take::<String>(KEY_REMEMBER_URL, now);
            ProtocolState::AwaitingTicketValidation.record(session, now)?;
            self.sessions.save(session).await?;
        }

        let result = self
            .validator
            .validate(&TicketValidateRequest {
                ticket: ticket.clone(),
                application: self.config.service().to_string(),
            })
            .await?;
        info!("ticket redeemed for {}", result.principal);

        // Always start a fresh local session once the principal is known.
        if let Some(previous) = ctx.session.take() {
            if let Err(err) = self.sessions.invalidate(previous.id()).await {
                debug!("previous session already gone: {err}");
            }
        }
        let mut session = self.sessions.create().await?;
        self.bind_principal(&mut session, &ticket, &result)?;
        self.sessions.save(&session).await?;

        let now = now_ms();
        self.bindings
            .bind(&ticket, session.id(), session.remaining(now))
            .await?;
        self.guard.reset(&result.principal).await?;
        Ok((session, remembered))
    }

    fn bind_principal(
        &self,
        session: &mut Session,
        ticket: &str,
        result: &TicketValidateResult,
    ) -> Result<(), AuthError> {
        let now = now_ms();
        session.bind(KEY_PRINCIPAL, &result.principal, None, now)?;
        session.bind(KEY_ROLES, &result.roles, None, now)?;
        session.bind(KEY_PERMISSIONS, &result.permissions, None, now)?;
        session.bind(KEY_ATTRIBUTES, &result.attributes, None, now)?;
        session.bind(KEY_DATA_CIPHER_KEY, &result.data_cipher_key, None, now)?;
        session.bind(
            KEY_ACCESS_TOKEN_SIGN_KEY,
            &result.access_token_sign_key,
            None,
            now,
        )?;
        session.bind(KEY_GRANT_TICKET, ticket, None, now)?;
        ProtocolState::Authenticated.record(session, now)?;
        Ok(())
    }

    /// Configured landing page, made absolute against this node.
    fn default_success_url(&self) -> String {
        let success = self.config.success_uri();
        if success.starts_with("http://") || success.starts_with("https://") {
            success.to_string()
        } else {
            format!("{}{success}", self.config.base_uri())
        }
    }

    /// Where to go after login: an explicit in-app `redirect_url`, else the
    /// remembered URL, else the configured success page.
    fn success_url(&self, ctx: &RequestContext, remembered: Option<String>) -> String {
        let base = self.config.base_uri();
        let requested = ctx
            .param(&self.config.params().redirect_url)
            .filter(|url| {
                let inside = is_within(base, url);
                if !inside {
                    warn!("ignoring redirect_url outside {base}: {url}");
                }
                inside
            })
            .map(str::to_string);
        let url = requested
            .or_else(|| {
                remembered.filter(|url| is_within(base, url) && self.config.rememberable(url))
            })
            .unwrap_or_else(|| self.default_success_url());
        self.configurer.decorate_success_url(url, ctx)
    }

    fn on_success(
        &self,
        ctx: &mut RequestContext,
        session: &Session,
        remembered: Option<String>,
    ) -> Result<AuthResponse, AuthError> {
        let now = now_ms();
        let params = self.config.params();
        let cookie = self.config.cookie();
        let principal = session
            .get::<String>(KEY_PRINCIPAL, now)
            .unwrap_or_default();
        let cipher_key = session
            .get::<String>(KEY_DATA_CIPHER_KEY, now)
            .unwrap_or_default();
        let sign_key = session
            .get::<String>(KEY_ACCESS_TOKEN_SIGN_KEY, now)
            .unwrap_or_default();
        let token = access_token(&sign_key, session.id())?;
        let success_url = self.success_url(ctx, remembered);

        let mut response = if ctx.wants_json(&params.response_type) {
            let body = RespBase::ok(ProtocolState::Authenticated, "authenticated")
                .with(&params.redirect_url, &success_url)
                .with(&params.service, self.config.service())
                .with("service_role", SERVICE_ROLE_CLIENT)
                .with(
                    "session",
                    json!({ "name": cookie.name(), "value": session.id() }),
                )
                .with(&params.data_cipher_key, &cipher_key)
                .with(&params.access_token, &token)
                .with("permits_url", self.permits_url());
            AuthResponse::json(StatusCode::OK, body)
        } else {
            AuthResponse::redirect(&success_url)
        };

        ctx.cookies.push(cookie.session(session.id()));
        if ctx.is_browser() {
            ctx.cookies
                .push(cookie.named(&params.data_cipher_key, &cipher_key, false));
            ctx.cookies.push(cookie.expiring(
                &params.access_token,
                &token,
                false,
                self.config.access_token_ttl(),
            ));
            ctx.cookies
                .push(cookie.named("permits_url", &self.permits_url(), false));
            let xsrf = generate_token("")?;
            ctx.cookies
                .push(cookie.named(self.config.xsrf_cookie(), &xsrf, false));
            response = response.with_header(HeaderName::from_static("p3p"), self.config.p3p());
        }
        response = response.with_cookies(ctx.cookies.drain(..));
        Ok(self.coprocessor.on_success(ctx, &principal, response))
    }

    async fn on_failure(
        &self,
        ctx: &mut RequestContext,
        err: AuthError,
    ) -> Result<AuthResponse, AuthError> {
        let state = ProtocolState::of(ctx.session.as_ref(), now_ms());
        if matches!(err, AuthError::Unauthorized(_) | AuthError::Transient(_)) {
            warn!("ticket redemption failed: {err:?}");
            let response = AuthResponse::error(&err, state).with_cookies(ctx.cookies.drain(..));
            return Ok(self.coprocessor.on_failure(ctx, &err, response));
        }

        let key = ctx
            .param(&self.config.params().principal)
            .map(str::to_string)
            .or_else(|| ctx.client_ip())
            .unwrap_or_else(|| "anonymous".to_string());
        let response = match self.guard.check(&key, &err).await? {
            GuardDecision::Blocked { attempts } => {
                warn!("giving up after {attempts} failed ticket round trips: {err:?}");
                AuthResponse::error(&AuthError::TooManyRequests, state)
                    .with_cookies(ctx.cookies.drain(..))
            }
            GuardDecision::Proceed { attempts } => {
                debug!("ticket round trip failed ({attempts}): {err:?}");
                let query = self.callback_query(ctx);
                self.redirector
                    .respond(ctx, query.as_deref(), RetCode::Unauthc, &err.to_string())
            }
        };
        Ok(self.coprocessor.on_failure(ctx, &err, response))
    }

    /// Callback query without the spent ticket parameters.
    fn callback_query(&self, ctx: &RequestContext) -> Option<String> {
        let params = self.config.params();
        let query = ctx.query.as_deref()?;
        let kept: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(name, _)| name != &params.grant_ticket && name != &params.principal)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            return None;
        }
        Some(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish(),
        )
    }

    /// Roles and permissions of the authenticated session.
    ///
    /// # Errors
    /// Returns faults such as an unavailable cache.
    pub async fn permits(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        if let Flow::Respond(response) = self.protect(ctx).await? {
            return Ok(response);
        }
        let now = now_ms();
        let session = ctx.session.as_ref();
        let read = |name: &str| {
            session
                .and_then(|session| session.get::<Value>(name, now))
                .unwrap_or(Value::Null)
        };
        let body = RespBase::ok(ProtocolState::Authenticated, "ok")
            .with(KEY_PRINCIPAL, read(KEY_PRINCIPAL))
            .with(KEY_ROLES, read(KEY_ROLES))
            .with(KEY_PERMISSIONS, read(KEY_PERMISSIONS));
        Ok(AuthResponse::json(StatusCode::OK, body))
    }

    /// Principal view handed to protected resources.
    #[must_use]
    pub fn principal_of(&self, session: &Session) -> Map<String, Value> {
        let now = now_ms();
        let mut view = Map::new();
        for key in [KEY_PRINCIPAL, KEY_ROLES, KEY_PERMISSIONS, KEY_ATTRIBUTES] {
            if let Some(value) = session.get::<Value>(key, now) {
                view.insert(key.to_string(), value);
            }
        }
        view
    }

    /// Authenticator logout URL that lands back on the success page, so the
    /// single sign-on session ends together with the local one.
    fn logout_url(&self, ctx: &RequestContext) -> String {
        let params = self.config.params();
        let url = with_query(
            &self.config.logout_url(),
            &[
                (params.service.as_str(), self.config.service()),
                (params.redirect_url.as_str(), &self.default_success_url()),
            ],
        );
        self.configurer.decorate_failure_url(url, ctx)
    }

    /// Close the local session, then hand the browser to the authenticator
    /// logout. Missing sessions are logged and ignored.
    ///
    /// # Errors
    /// Returns faults such as an unavailable cache.
    #[instrument(skip_all)]
    pub async fn logout(&self, ctx: &mut RequestContext) -> Result<AuthResponse, AuthError> {
        let cookie = self.config.cookie();
        if let Some(id) = ctx.session_id(cookie.name(), &self.config.params().sid) {
            let ticket = self
                .sessions
                .load(&id)
                .await?
                .and_then(|session| session.get::<String>(KEY_GRANT_TICKET, now_ms()));
            match ticket {
                Some(ticket) => self.bindings.unbind(&ticket).await?,
                None => self.bindings.unbind_session(&id).await?,
            }
            match self.sessions.invalidate(&id).await {
                Ok(()) => info!("local session closed"),
                Err(SessionError::AlreadyInvalid(_)) => {
                    warn!("logout for a session that is already invalid");
                }
                Err(err) => return Err(err.into()),
            }
        }
        ctx.session = None;
        ctx.cookies.push(cookie.clear(cookie.name()));

        let logout_url = self.logout_url(ctx);
        if ctx.wants_json(&self.config.params().response_type) {
            let body = RespBase::ok(ProtocolState::LoggedOut, "logged out")
                .with("logout_url", &logout_url)
                .with("login_url", self.redirector.login_url(ctx, None));
            return Ok(AuthResponse::json(StatusCode::OK, body).with_cookies(ctx.cookies.drain(..)));
        }
        Ok(AuthResponse::redirect(&logout_url).with_cookies(ctx.cookies.drain(..)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NoopCoprocessor, Reply, StaticSecurityConfigurer, ValidateError};
    use anyhow::{anyhow, Result};
    use axum::http::{HeaderMap, HeaderValue};
    use std::time::Duration;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

    struct FakeValidator {
        outcome: fn(&str) -> Result<TicketValidateResult, ValidateError>,
    }

    #[async_trait]
    impl TicketValidator for FakeValidator {
        async fn validate(
            &self,
            request: &TicketValidateRequest,
        ) -> Result<TicketValidateResult, ValidateError> {
            (self.outcome)(&request.ticket)
        }
    }

    fn accept_good(ticket: &str) -> Result<TicketValidateResult, ValidateError> {
        if ticket == "ST-good" {
            Ok(TicketValidateResult {
                principal: "alice".to_string(),
                roles: vec!["admin".to_string()],
                data_cipher_key: "cipher".to_string(),
                access_token_sign_key: "sign".to_string(),
                ..TicketValidateResult::default()
            })
        } else {
            Err(ValidateError::Invalid(format!("{ticket} expired")))
        }
    }

    fn deny(_: &str) -> Result<TicketValidateResult, ValidateError> {
        Err(ValidateError::Unauthorized("no access".to_string()))
    }

    fn time_out(_: &str) -> Result<TicketValidateResult, ValidateError> {
        Err(ValidateError::Transient("timed out".to_string()))
    }

    fn engine(outcome: fn(&str) -> Result<TicketValidateResult, ValidateError>) -> ClientEngine {
        let config = ProtocolConfig::new("portal", "http://sso:8080", "http://portal:8081")
            .with_cookie(crate::protocol::CookieConfig::new(crate::protocol::CLIENT_COOKIE))
            .with_try_redirect(5, Duration::from_secs(10));
        ClientEngine::new(
            config,
            &CacheManager::in_memory("test"),
            Arc::new(FakeValidator { outcome }),
            Arc::new(StaticSecurityConfigurer::default()),
            Arc::new(NoopCoprocessor),
        )
    }

    fn browser(path: &str, query: Option<&str>, cookie: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static(BROWSER));
        if let Some(cookie) = cookie {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                headers.insert("cookie", value);
            }
        }
        RequestContext::new(Method::GET, path, query, headers, b"")
    }

    fn session_cookie(response: &AuthResponse) -> Option<String> {
        response
            .cookies()
            .iter()
            .find(|cookie| cookie.starts_with("FASTCAS_CLIENT_SID="))
            .and_then(|cookie| cookie.split(';').next())
            .map(str::to_string)
    }

    #[test]
    fn access_token_is_hex_hmac() -> Result<(), AuthError> {
        let token = access_token("sign", "session-1")?;
        assert_eq!(token.len(), 64);
        assert_eq!(token, access_token("sign", "session-1")?);
        assert_ne!(token, access_token("other", "session-1")?);
        Ok(())
    }

    #[tokio::test]
    async fn unauthenticated_browser_is_redirected_and_remembered() -> Result<()> {
        let engine = engine(accept_good);
        let mut ctx = browser("/orders", Some("id=7"), None);

        let Flow::Respond(response) = engine.protect(&mut ctx).await? else {
            return Err(anyhow!("expected a redirect"));
        };
        let location = response.location().ok_or_else(|| anyhow!("no location"))?;
        assert!(location.starts_with("http://sso:8080/login?service=portal&redirect_url="));
        assert!(location.contains("authenticator%3Fid%3D7"));
        assert!(session_cookie(&response).is_some());

        let remembered = ctx
            .session
            .as_ref()
            .and_then(|session| session.get::<String>(KEY_REMEMBER_URL, now_ms()));
        assert_eq!(remembered.as_deref(), Some("http://portal:8081/orders?id=7"));
        Ok(())
    }

    #[tokio::test]
    async fn api_caller_gets_unauthc_envelope() -> Result<()> {
        let engine = engine(accept_good);
        let mut ctx = RequestContext::new(Method::GET, "/orders", None, HeaderMap::new(), b"");

        let Flow::Respond(response) = engine.protect(&mut ctx).await? else {
            return Err(anyhow!("expected a response"));
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.body().ok_or_else(|| anyhow!("no body"))?;
        assert_eq!(body.code, RetCode::Unauthc);
        assert_eq!(body.data["service_role"], SERVICE_ROLE_CLIENT);
        assert!(ctx.session.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn ticket_callback_returns_to_remembered_url() -> Result<()> {
        let engine = engine(accept_good);
        let mut first = browser("/orders", Some("id=7"), None);
        let Flow::Respond(redirect) = engine.protect(&mut first).await? else {
            return Err(anyhow!("expected a redirect"));
        };
        let cookie = session_cookie(&redirect).ok_or_else(|| anyhow!("no cookie"))?;

        let mut callback = browser(
            "/authenticator",
            Some("id=7&grantTicket=ST-good&principal=alice"),
            Some(&cookie),
        );
        let response = engine.authenticate(&mut callback).await?;
        assert_eq!(response.location(), Some("http://portal:8081/orders?id=7"));
        assert!(response.cookies().iter().any(|c| c.starts_with("XSRF-TOKEN=")));
        let token_cookie = response
            .cookies()
            .iter()
            .find(|c| c.starts_with("access_token="))
            .ok_or_else(|| anyhow!("no access token cookie"))?;
        assert!(token_cookie.ends_with("; Max-Age=300"));
        let new_cookie = session_cookie(&response).ok_or_else(|| anyhow!("no cookie"))?;
        assert_ne!(new_cookie, cookie);

        let mut again = browser("/orders", None, Some(&new_cookie));
        assert!(matches!(engine.protect(&mut again).await?, Flow::Continue));
        let session = again.session.ok_or_else(|| anyhow!("no session"))?;
        assert_eq!(engine.principal_of(&session)["principal"], "alice");
        Ok(())
    }

    #[tokio::test]
    async fn foreign_redirect_url_falls_back_to_success_page() -> Result<()> {
        let engine = engine(accept_good);
        let mut callback = browser(
            "/authenticator",
            Some("grantTicket=ST-good&redirect_url=http%3A%2F%2Fportal%3A8081.evil.example%2Fsteal"),
            None,
        );
        let response = engine.authenticate(&mut callback).await?;
        assert_eq!(response.location(), Some("http://portal:8081/"));

        let mut callback = browser(
            "/authenticator",
            Some("grantTicket=ST-good&redirect_url=http%3A%2F%2Fportal%3A8081%2Freports"),
            None,
        );
        let response = engine.authenticate(&mut callback).await?;
        assert_eq!(response.location(), Some("http://portal:8081/reports"));
        Ok(())
    }

    #[tokio::test]
    async fn json_success_carries_session_and_tokens() -> Result<()> {
        let engine = engine(accept_good);
        let mut ctx = RequestContext::new(
            Method::GET,
            "/authenticator",
            Some("grantTicket=ST-good&response_type=json"),
            HeaderMap::new(),
            b"",
        );
        let response = engine.authenticate(&mut ctx).await?;
        let Reply::Json(status, body) = response.reply() else {
            return Err(anyhow!("expected json"));
        };
        assert_eq!(*status, StatusCode::OK);
        let sid = body.data["session"]["value"]
            .as_str()
            .ok_or_else(|| anyhow!("no session"))?;
        assert_eq!(body.data["session"]["name"], "FASTCAS_CLIENT_SID");
        assert_eq!(body.data["access_token"], access_token("sign", sid)?);
        assert_eq!(body.data["data_cipher_key"], "cipher");
        assert_eq!(body.data["redirect_url"], "http://portal:8081/");
        assert_eq!(body.data["permits_url"], "http://portal:8081/permits");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_invalid_tickets_trip_the_guard() -> Result<()> {
        let engine = engine(accept_good);
        for _ in 0..5 {
            let mut ctx = browser("/authenticator", Some("grantTicket=ST-stale&principal=alice"), None);
            let response = engine.authenticate(&mut ctx).await?;
            let location = response.location().ok_or_else(|| anyhow!("no redirect"))?;
            assert!(!location.contains("ST-stale"));
        }
        let mut ctx = browser("/authenticator", Some("grantTicket=ST-stale&principal=alice"), None);
        let response = engine.authenticate(&mut ctx).await?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.location().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn denied_access_is_not_redirected() -> Result<()> {
        let engine = engine(deny);
        let mut ctx = browser("/authenticator", Some("grantTicket=ST-good"), None);
        let response = engine.authenticate(&mut ctx).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.location().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_is_reported_as_unavailable() -> Result<()> {
        let engine = engine(time_out);
        let mut ctx = RequestContext::new(
            Method::GET,
            "/authenticator",
            Some("grantTicket=ST-good"),
            HeaderMap::new(),
            b"",
        );
        let response = engine.authenticate(&mut ctx).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.body().map(|body| body.code),
            Some(RetCode::Unavailable)
        );
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_is_not_redirected_for_browsers() -> Result<()> {
        let engine = engine(time_out);
        let mut ctx = browser("/authenticator", Some("grantTicket=ST-good&principal=alice"), None);
        let response = engine.authenticate(&mut ctx).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.location().is_none());
        assert_eq!(
            response.body().map(|body| body.code),
            Some(RetCode::Unavailable)
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_ends_the_local_session_and_visits_the_authenticator() -> Result<()> {
        let engine = engine(accept_good);
        let mut callback = browser("/authenticator", Some("grantTicket=ST-good"), None);
        let response = engine.authenticate(&mut callback).await?;
        let cookie = session_cookie(&response).ok_or_else(|| anyhow!("no cookie"))?;

        let mut ctx = browser("/logout", None, Some(&cookie));
        let response = engine.logout(&mut ctx).await?;
        assert_eq!(
            response.location(),
            Some("http://sso:8080/logout?service=portal&redirect_url=http%3A%2F%2Fportal%3A8081%2F")
        );
        assert_eq!(engine.bindings.session_of("ST-good").await?, None);

        let mut again = browser("/orders", None, Some(&cookie));
        assert!(matches!(engine.protect(&mut again).await?, Flow::Respond(_)));
        Ok(())
    }

    #[tokio::test]
    async fn logout_tolerates_missing_sessions() -> Result<()> {
        let engine = engine(accept_good);
        let mut ctx = browser("/logout", None, Some("FASTCAS_CLIENT_SID=gone"));
        let response = engine.logout(&mut ctx).await?;
        assert!(response
            .cookies()
            .iter()
            .any(|cookie| cookie.contains("Max-Age=0")));
        assert!(response.location().is_some());
        Ok(())
    }
}
