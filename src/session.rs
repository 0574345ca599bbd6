use axum::{
    extract::{FromRef, FromRequestParts},
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
        request::Parts,
    },
    response::{IntoResponseParts, ResponseParts},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use thiserror::Error;

use crate::{config::AppConfig, models::UserInfo};

/// Name of the cookie carrying the signed session.
pub const SESSION_COOKIE: &str = "session";

/// Flash messages are cut to this many characters; they travel in the cookie.
pub const MAX_FLASH_CHARS: usize = 300;

// Browsers silently drop larger cookies.
const MAX_COOKIE_BYTES: usize = 4096;

/// Session
///
/// Everything this front-end remembers about a browser. It lives entirely in the
/// `session` cookie as the claims of an HS256 token signed with the configured secret,
/// so there is no server-side store. Absent fields are omitted from the cookie, which
/// keeps an anonymous session at zero keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_jwt: Option<String>,
    /// Unix timestamp (seconds) of the last completed login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_authenticated: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phabricator_api_token: Option<String>,
    // Pending login: the OIDC `state` we sent and where to go afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_next: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashes: Vec<Flash>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Success,
    Error,
}

impl FlashCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashCategory::Success => "success",
            FlashCategory::Error => "error",
        }
    }
}

impl Session {
    /// Names of the fields currently stored.
    pub fn keys(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Queues a message for the next page view, shortened to `MAX_FLASH_CHARS`.
    pub fn flash(&mut self, category: FlashCategory, message: impl Into<String>) {
        let mut message = message.into();
        if let Some((cut, _)) = message.char_indices().nth(MAX_FLASH_CHARS) {
            message.truncate(cut);
            message.push('…');
        }
        self.flashes.push(Flash { category, message });
    }

    /// Removes and returns pending flash messages.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }

    /// Returns the CSRF token, minting one if the session has none yet.
    /// The flag is true when a new token was created.
    pub fn ensure_csrf_token(&mut self) -> (String, bool) {
        match &self.csrf_token {
            Some(token) => (token.clone(), false),
            None => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                self.csrf_token = Some(token.clone());
                (token, true)
            }
        }
    }

    /// Drops every identity field. Front-end state such as the Phabricator token survives.
    pub fn clear_identity(&mut self) {
        self.id_token = None;
        self.access_token = None;
        self.userinfo = None;
        self.id_token_jwt = None;
        self.last_authenticated = None;
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to sign session cookie: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
    #[error("session cookie is not a valid header value")]
    InvalidHeader,
}

/// Claims embedded in the cookie token.
#[derive(Serialize, Deserialize)]
struct SessionClaims {
    exp: i64,
    #[serde(flatten)]
    session: Session,
}

/// Signs `session` into the cookie value.
pub fn encode_session(session: &Session, config: &AppConfig) -> Result<String, SessionError> {
    let claims = SessionClaims {
        exp: Utc::now().timestamp() + config.session_lifetime_secs,
        session: session.clone(),
    };
    let key = EncodingKey::from_secret(config.session_secret.as_bytes());
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &key)?)
}

/// Verifies and decodes a cookie value. Bad signatures and expired cookies are errors.
pub fn decode_session(
    token: &str,
    config: &AppConfig,
) -> Result<Session, jsonwebtoken::errors::Error> {
    let key = DecodingKey::from_secret(config.session_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<SessionClaims>(token, &key, &validation).map(|data| data.claims.session)
}

/// Looks up a cookie by name across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn cookie_attributes(config: &AppConfig) -> &'static str {
    if config.secure_cookies() {
        "Path=/; HttpOnly; SameSite=Lax; Secure"
    } else {
        "Path=/; HttpOnly; SameSite=Lax"
    }
}

/// SessionCookie
///
/// A `Set-Cookie` response part persisting the session, or expiring the cookie when the
/// session is empty.
#[derive(Debug, Clone)]
pub struct SessionCookie(HeaderValue);

impl SessionCookie {
    pub fn save(session: &Session, config: &AppConfig) -> Result<Self, SessionError> {
        if session.is_empty() {
            return Ok(Self::clear(config));
        }

        let token = encode_session(session, config)?;
        let cookie = format!(
            "{}={}; Max-Age={}; {}",
            SESSION_COOKIE,
            token,
            config.session_lifetime_secs,
            cookie_attributes(config)
        );
        if cookie.len() > MAX_COOKIE_BYTES {
            tracing::warn!(bytes = cookie.len(), "session cookie exceeds browser limits");
        }
        HeaderValue::from_str(&cookie)
            .map(Self)
            .map_err(|_| SessionError::InvalidHeader)
    }

    pub fn clear(config: &AppConfig) -> Self {
        let cookie = format!("{}=; Max-Age=0; {}", SESSION_COOKIE, cookie_attributes(config));
        Self(HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static("")))
    }
}

impl IntoResponseParts for SessionCookie {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        res.headers_mut().append(SET_COOKIE, self.0);
        Ok(res)
    }
}

/// Session extractor
///
/// Never rejects: a missing, tampered or expired cookie simply yields an empty session.
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        let Some(token) = read_cookie(&parts.headers, SESSION_COOKIE).filter(|t| !t.is_empty())
        else {
            return Ok(Session::default());
        };

        match decode_session(token, &config) {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::debug!(error = %e, "discarding unreadable session cookie");
                Ok(Session::default())
            }
        }
    }
}
