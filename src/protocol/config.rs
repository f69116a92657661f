use std::time::Duration;

pub const AUTHENTICATOR_COOKIE: &str = "FASTCAS_SID";
pub const CLIENT_COOKIE: &str = "FASTCAS_CLIENT_SID";

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_TRY_REDIRECT_MAX: i64 = 5;
const DEFAULT_TRY_REDIRECT_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_FAILED_LOGIN_MAX: i64 = 10;
const DEFAULT_FAILED_LOGIN_WINDOW: Duration = Duration::from_secs(10 * 60);
const DEFAULT_P3P: &str = "CP=\"CAO PSA OUR\"";

/// Names of the request parameters exchanged during redirects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamNames {
    pub service: String,
    pub redirect_url: String,
    pub grant_ticket: String,
    pub principal: String,
    pub credentials: String,
    pub crypt_kind: String,
    pub sid: String,
    pub data_cipher_key: String,
    pub access_token: String,
    pub response_type: String,
}

impl Default for ParamNames {
    fn default() -> Self {
        Self {
            service: "service".to_string(),
            redirect_url: "redirect_url".to_string(),
            grant_ticket: "grantTicket".to_string(),
            principal: "principal".to_string(),
            credentials: "credentials".to_string(),
            crypt_kind: "kind".to_string(),
            sid: "__sid".to_string(),
            data_cipher_key: "data_cipher_key".to_string(),
            access_token: "access_token".to_string(),
            response_type: "response_type".to_string(),
        }
    }
}

/// Attributes shared by every cookie a node sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieConfig {
    name: String,
    path: String,
    same_site: String,
    secure: bool,
    max_age: Option<i64>,
}

impl CookieConfig {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: "/".to_string(),
            same_site: "Lax".to_string(),
            secure: false,
            max_age: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: &str) -> Self {
        self.same_site = same_site.to_string();
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// `None` keeps cookies for the browser session only.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<i64>) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, name: &str, value: &str, http_only: bool, max_age: Option<i64>) -> String {
        let mut cookie = format!("{name}={value}; Path={}", self.path);
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str(&format!("; SameSite={}", self.same_site));
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value for the session id.
    #[must_use]
    pub fn session(&self, session_id: &str) -> String {
        self.render(&self.name, session_id, true, self.max_age)
    }

    /// `Set-Cookie` value for an auxiliary cookie sharing these attributes.
    #[must_use]
    pub fn named(&self, name: &str, value: &str, http_only: bool) -> String {
        self.render(name, value, http_only, self.max_age)
    }

    /// Like [`CookieConfig::named`] with its own lifetime.
    #[must_use]
    pub fn expiring(&self, name: &str, value: &str, http_only: bool, ttl: Duration) -> String {
        let max_age = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.render(name, value, http_only, Some(max_age))
    }

    /// Expire cookie `name` immediately.
    #[must_use]
    pub fn clear(&self, name: &str) -> String {
        self.render(name, "", true, Some(0))
    }
}

/// Runtime settings of either protocol role.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    service: String,
    server_uri: String,
    base_uri: String,
    success_uri: String,
    params: ParamNames,
    cookie: CookieConfig,
    session_timeout: Duration,
    access_token_ttl: Duration,
    validate_timeout: Duration,
    try_redirect_max: i64,
    try_redirect_window: Duration,
    failed_login_max: i64,
    failed_login_window: Duration,
    remember_redirect: bool,
    excluded_remember_suffixes: Vec<String>,
    xsrf_cookie: String,
    p3p: String,
}

impl ProtocolConfig {
    /// `service` is this node's application name, `server_uri` the
    /// authenticator base URL and `base_uri` the URL this node is reached at.
    #[must_use]
    pub fn new(service: &str, server_uri: &str, base_uri: &str) -> Self {
        Self {
            service: service.to_string(),
            server_uri: server_uri.trim_end_matches('/').to_string(),
            base_uri: base_uri.trim_end_matches('/').to_string(),
            success_uri: "/".to_string(),
            params: ParamNames::default(),
            cookie: CookieConfig::new(AUTHENTICATOR_COOKIE),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            validate_timeout: DEFAULT_VALIDATE_TIMEOUT,
            try_redirect_max: DEFAULT_TRY_REDIRECT_MAX,
            try_redirect_window: DEFAULT_TRY_REDIRECT_WINDOW,
            failed_login_max: DEFAULT_FAILED_LOGIN_MAX,
            failed_login_window: DEFAULT_FAILED_LOGIN_WINDOW,
            remember_redirect: true,
            excluded_remember_suffixes: vec!["/logout".to_string()],
            xsrf_cookie: "XSRF-TOKEN".to_string(),
            p3p: DEFAULT_P3P.to_string(),
        }
    }

    #[must_use]
    pub fn with_success_uri(mut self, success_uri: &str) -> Self {
        self.success_uri = success_uri.to_string();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: ParamNames) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: CookieConfig) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_try_redirect(mut self, max: i64, window: Duration) -> Self {
        self.try_redirect_max = max;
        self.try_redirect_window = window;
        self
    }

    #[must_use]
    pub fn with_failed_login(mut self, max: i64, window: Duration) -> Self {
        self.failed_login_max = max;
        self.failed_login_window = window;
        self
    }

    #[must_use]
    pub fn with_remember_redirect(mut self, remember: bool) -> Self {
        self.remember_redirect = remember;
        self
    }

    #[must_use]
    pub fn with_xsrf_cookie(mut self, name: &str) -> Self {
        self.xsrf_cookie = name.to_string();
        self
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn server_uri(&self) -> &str {
        &self.server_uri
    }

    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    #[must_use]
    pub fn success_uri(&self) -> &str {
        &self.success_uri
    }

    #[must_use]
    pub fn params(&self) -> &ParamNames {
        &self.params
    }

    #[must_use]
    pub fn cookie(&self) -> &CookieConfig {
        &self.cookie
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Lifetime of the access token cookie set after a login.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn validate_timeout(&self) -> Duration {
        self.validate_timeout
    }

    #[must_use]
    pub fn try_redirect_max(&self) -> i64 {
        self.try_redirect_max
    }

    #[must_use]
    pub fn try_redirect_window(&self) -> Duration {
        self.try_redirect_window
    }

    #[must_use]
    pub fn failed_login_max(&self) -> i64 {
        self.failed_login_max
    }

    #[must_use]
    pub fn failed_login_window(&self) -> Duration {
        self.failed_login_window
    }

    #[must_use]
    pub fn xsrf_cookie(&self) -> &str {
        &self.xsrf_cookie
    }

    #[must_use]
    pub fn p3p(&self) -> &str {
        &self.p3p
    }

    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/login", self.server_uri)
    }

    #[must_use]
    pub fn logout_url(&self) -> String {
        format!("{}/logout", self.server_uri)
    }

    #[must_use]
    pub fn validate_url(&self) -> String {
        format!("{}/validate", self.server_uri)
    }

    /// Callback the authenticator sends browsers back to, carrying the
    /// original query string so parameters survive the round trip.
    #[must_use]
    pub fn callback_url(&self, query: Option<&str>) -> String {
        match query.filter(|query| !query.trim().is_empty()) {
            Some(query) => format!("{}/authenticator?{query}", self.base_uri),
            None => format!("{}/authenticator", self.base_uri),
        }
    }

    /// Whether `url` may be remembered as a post-login destination.
    #[must_use]
    pub fn rememberable(&self, url: &str) -> bool {
        self.remember_redirect
            && !self
                .excluded_remember_suffixes
                .iter()
                .any(|suffix| url.ends_with(suffix.as_str()))
    }
}
