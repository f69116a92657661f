use super::{AuthError, ProtocolState, RetCode};
use axum::{
    http::{
        header::{HeaderName, LOCATION, SET_COOKIE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use utoipa::ToSchema;

/// JSON envelope of every protocol response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RespBase {
    pub code: RetCode,
    /// Protocol state of the caller's session.
    pub status: String,
    pub message: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
}

impl RespBase {
    #[must_use]
    pub fn new(code: RetCode, state: ProtocolState, message: &str) -> Self {
        Self {
            code,
            status: state.to_string(),
            message: message.to_string(),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn ok(state: ProtocolState, message: &str) -> Self {
        Self::new(RetCode::Ok, state, message)
    }

    #[must_use]
    pub fn error(err: &AuthError, state: ProtocolState) -> Self {
        Self::new(err.code(), state, &err.to_string())
    }

    /// Add one `data` entry; values that fail to serialize become `null`.
    #[must_use]
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.data.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    /// Merge the fields of a serializable struct into `data`.
    #[must_use]
    pub fn with_fields<T: Serialize>(mut self, value: &T) -> Self {
        if let Ok(Value::Object(fields)) = serde_json::to_value(value) {
            self.data.extend(fields);
        }
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == RetCode::Ok
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Redirect(String),
    Json(StatusCode, RespBase),
}

/// Outcome of a protocol step, rendered by the HTTP layer.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthResponse {
    reply: Reply,
    cookies: Vec<String>,
    headers: Vec<(HeaderName, String)>,
}

impl AuthResponse {
    #[must_use]
    pub fn redirect(url: &str) -> Self {
        Self {
            reply: Reply::Redirect(url.to_string()),
            cookies: Vec::new(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn json(status: StatusCode, body: RespBase) -> Self {
        Self {
            reply: Reply::Json(status, body),
            cookies: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Error envelope with the status mapped from the error.
    #[must_use]
    pub fn error(err: &AuthError, state: ProtocolState) -> Self {
        Self::json(err.status(), RespBase::error(err, state))
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: impl IntoIterator<Item = String>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    #[must_use]
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    #[must_use]
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match &self.reply {
            Reply::Redirect(url) => Some(url),
            Reply::Json(..) => None,
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&RespBase> {
        match &self.reply {
            Reply::Json(_, body) => Some(body),
            Reply::Redirect(_) => None,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.reply {
            Reply::Redirect(_) => StatusCode::FOUND,
            Reply::Json(status, _) => *status,
        }
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let mut response = match self.reply {
            Reply::Redirect(url) => match HeaderValue::from_str(&url) {
                Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
                Err(err) => {
                    warn!("Invalid redirect location: {err}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            Reply::Json(status, body) => (status, Json(body)).into_response(),
        };

        let headers = response.headers_mut();
        for cookie in self.cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(err) => warn!("Skipping invalid cookie: {err}"),
            }
        }
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_wire_shape() -> Result<(), serde_json::Error> {
        let body = RespBase::ok(ProtocolState::Authenticated, "ok").with("service", "portal");
        let json = serde_json::to_value(&body)?;
        assert_eq!(json["code"], "OK");
        assert_eq!(json["status"], "authenticated");
        assert_eq!(json["data"]["service"], "portal");
        Ok(())
    }

    #[test]
    fn error_envelope_uses_sanitized_message() {
        let err = AuthError::Configuration("salt missing for alice".into());
        let response = AuthResponse::error(&err, ProtocolState::Anonymous);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.body().map(|body| body.message.as_str()),
            Some("system error")
        );
    }

    #[test]
    fn rendered_response_carries_cookies_and_location() {
        let response = AuthResponse::redirect("http://portal/")
            .with_cookies(["a=1; Path=/".to_string(), "b=2; Path=/".to_string()])
            .with_header(HeaderName::from_static("p3p"), "CP=\"CAO\"")
            .into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("http://portal/")
        );
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
        assert!(response.headers().contains_key("p3p"));
    }
}
