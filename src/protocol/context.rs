use crate::session::Session;
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT},
    HeaderMap, Method,
};
use std::collections::HashMap;

/// Everything one request carries through the protocol engines.
///
/// Built once per request by the HTTP layer and threaded explicitly through
/// every middleware and handler; nothing is looked up from ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    params: HashMap<String, String>,
    /// Session loaded for this request, if any.
    pub session: Option<Session>,
    /// `Set-Cookie` values to attach to whatever response is produced.
    pub cookies: Vec<String>,
}

impl RequestContext {
    /// Parameters come from the query string, then from a form or JSON body.
    /// A query parameter wins over a body parameter of the same name.
    #[must_use]
    pub fn new(
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: &[u8],
    ) -> Self {
        let mut params = body_params(&headers, body);
        if let Some(query) = query {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                params.insert(name.into_owned(), value.into_owned());
            }
        }
        Self {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            params,
            session: None,
            cookies: Vec::new(),
        }
    }

    /// Non-blank parameter value.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| {
                let mut parts = pair.trim().splitn(2, '=');
                Some((parts.next()?.trim(), parts.next()?.trim()))
            })
            .find(|(key, value)| *key == name && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }

    /// Session id from the session cookie, else from the `sid` parameter used
    /// by callers without a cookie jar.
    #[must_use]
    pub fn session_id(&self, cookie_name: &str, sid_param: &str) -> Option<String> {
        self.cookie(cookie_name)
            .or_else(|| self.param(sid_param).map(str::to_string))
    }

    fn header(&self, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Interactive browser, as opposed to an API client.
    #[must_use]
    pub fn is_browser(&self) -> bool {
        self.header(USER_AGENT).is_some_and(|agent| {
            let agent = agent.to_ascii_lowercase();
            ["mozilla", "chrome", "safari", "edge", "opera"]
                .iter()
                .any(|marker| agent.contains(marker))
        })
    }

    #[must_use]
    pub fn is_xhr(&self) -> bool {
        self.header("x-requested-with")
            .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
    }

    /// Whether the caller expects a JSON envelope instead of a redirect.
    #[must_use]
    pub fn wants_json(&self, response_type_param: &str) -> bool {
        if let Some(kind) = self.param(response_type_param) {
            return kind.eq_ignore_ascii_case("json");
        }
        if self.is_xhr() {
            return true;
        }
        let accepts_json = self
            .header(ACCEPT)
            .is_some_and(|accept| accept.contains("application/json"));
        accepts_json || !self.is_browser()
    }

    /// Client address from the proxy headers.
    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if forwarded.is_some() {
            return forwarded.map(str::to_string);
        }
        self.header("x-real-ip")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// This request's URL under `base_uri`, query included.
    #[must_use]
    pub fn request_url(&self, base_uri: &str) -> String {
        match self.query.as_deref().filter(|query| !query.is_empty()) {
            Some(query) => format!("{base_uri}{}?{query}", self.path),
            None => format!("{base_uri}{}", self.path),
        }
    }
}

fn body_params(headers: &HeaderMap, body: &[u8]) -> HashMap<String, String> {
    if body.is_empty() {
        return HashMap::new();
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("application/json") {
        let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(body) else {
            return HashMap::new();
        };
        return fields
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(value) => Some((name, value)),
                serde_json::Value::Number(value) => Some((name, value.to_string())),
                serde_json::Value::Bool(value) => Some((name, value.to_string())),
                _ => None,
            })
            .collect();
    }
    url::form_urlencoded::parse(body)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn query_params_override_form_body() {
        let ctx = RequestContext::new(
            Method::POST,
            "/login",
            Some("service=portal&principal=bob"),
            headers(&[("content-type", "application/x-www-form-urlencoded")]),
            b"principal=alice&credentials=abcd&blank=",
        );
        assert_eq!(ctx.param("service"), Some("portal"));
        assert_eq!(ctx.param("principal"), Some("bob"));
        assert_eq!(ctx.param("credentials"), Some("abcd"));
        assert_eq!(ctx.param("blank"), None);
    }

    #[test]
    fn json_body_params() {
        let ctx = RequestContext::new(
            Method::POST,
            "/login",
            None,
            headers(&[("content-type", "application/json")]),
            br#"{"principal":"alice","remember":true,"nested":{"a":1}}"#,
        );
        assert_eq!(ctx.param("principal"), Some("alice"));
        assert_eq!(ctx.param("remember"), Some("true"));
        assert_eq!(ctx.param("nested"), None);
    }

    #[test]
    fn cookies_are_found_across_headers() {
        let ctx = RequestContext::new(
            Method::GET,
            "/",
            None,
            headers(&[("cookie", "a=1; FASTCAS_SID=xyz"), ("cookie", "b=2")]),
            b"",
        );
        assert_eq!(ctx.cookie("FASTCAS_SID").as_deref(), Some("xyz"));
        assert_eq!(ctx.cookie("b").as_deref(), Some("2"));
        assert_eq!(ctx.cookie("missing"), None);
        assert_eq!(
            ctx.session_id("FASTCAS_SID", "__sid").as_deref(),
            Some("xyz")
        );

        let api = RequestContext::new(Method::GET, "/", Some("__sid=abc"), HeaderMap::new(), b"");
        assert_eq!(api.session_id("FASTCAS_SID", "__sid").as_deref(), Some("abc"));
    }

    #[test]
    fn response_kind_negotiation() {
        let browser = RequestContext::new(
            Method::GET,
            "/",
            None,
            headers(&[("user-agent", BROWSER), ("accept", "text/html")]),
            b"",
        );
        assert!(browser.is_browser());
        assert!(!browser.wants_json("response_type"));

        let xhr = RequestContext::new(
            Method::GET,
            "/",
            None,
            headers(&[("user-agent", BROWSER), ("x-requested-with", "XMLHttpRequest")]),
            b"",
        );
        assert!(xhr.wants_json("response_type"));

        let forced = RequestContext::new(
            Method::GET,
            "/",
            Some("response_type=json"),
            headers(&[("user-agent", BROWSER)]),
            b"",
        );
        assert!(forced.wants_json("response_type"));

        let api = RequestContext::new(Method::GET, "/", None, HeaderMap::new(), b"");
        assert!(api.wants_json("response_type"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let ctx = RequestContext::new(
            Method::GET,
            "/",
            None,
            headers(&[
                ("x-forwarded-for", "10.0.0.1, 10.0.0.2"),
                ("x-real-ip", "10.0.0.9"),
            ]),
            b"",
        );
        assert_eq!(ctx.client_ip().as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn request_url_keeps_query() {
        let ctx = RequestContext::new(Method::GET, "/orders", Some("id=7"), HeaderMap::new(), b"");
        assert_eq!(ctx.request_url("http://portal"), "http://portal/orders?id=7");
    }
}
