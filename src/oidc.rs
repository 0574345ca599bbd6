//! Auth0 / OpenID Connect login.
//!
//! Sign-in is the standard authorization code flow: redirect to the provider, receive a
//! code on `/redirect_uri`, exchange it for tokens, verify the ID token and load the
//! userinfo document. The results are what the auth gate later checks in the session.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{AppConfig, OidcConfig},
    models::UserInfo,
    session::Session,
};

/// Path of the OIDC callback route.
pub const REDIRECT_PATH: &str = "/redirect_uri";

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("login state mismatch")]
    StateMismatch,
    #[error("identity provider returned an error: {0}")]
    Provider(String),
    #[error("failed to reach identity provider: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider returned {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid ID token: {0}")]
    InvalidIdToken(#[from] jsonwebtoken::errors::Error),
}

/// TokenResponse
///
/// Body of a successful `oauth/token` exchange.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// IdTokenClaims
///
/// The ID token claims we rely on. Signature, audience, issuer and expiry are checked
/// by `jsonwebtoken` before these are trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

/// CompletedLogin
///
/// Everything the callback stores in the session.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub claims: IdTokenClaims,
    pub id_token_jwt: String,
    pub access_token: String,
    pub userinfo: UserInfo,
}

impl CompletedLogin {
    /// Writes the identity fields into the session and stamps the login time.
    pub fn apply_to(self, session: &mut Session) {
        session.id_token = Some(self.claims.sub);
        session.id_token_jwt = Some(self.id_token_jwt);
        session.access_token = Some(self.access_token);
        session.userinfo = Some(self.userinfo);
        session.last_authenticated = Some(Utc::now().timestamp());
        session.oidc_state = None;
    }
}

/// True for same-site absolute paths such as `/D1/`. Rejects scheme-relative and
/// backslash tricks so the post-login redirect cannot leave the site.
///
/// Browsers drop tabs and newlines while parsing a `Location`, so `/\t/host` would turn
/// into `//host`; any control character disqualifies the path, as do encoded slashes.
pub fn is_local_path(path: &str) -> bool {
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') {
        return false;
    }
    if path.chars().any(char::is_control) {
        return false;
    }
    let lowered = path.to_ascii_lowercase();
    !lowered.contains("%2f") && !lowered.contains("%5c")
}

/// Appends URL-encoded query parameters to an absolute URL.
pub fn url_with_query(base: &str, params: &[(&str, &str)]) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Some(url.into())
}

/// Appends URL-encoded query parameters to a local path.
pub fn local_path_with_query(path: &str, params: &[(&str, &str)]) -> String {
    let Ok(mut url) = Url::parse("http://localhost").and_then(|base| base.join(path)) else {
        return path.to_string();
    };
    url.query_pairs_mut().extend_pairs(params);
    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", url.path(), query),
        _ => url.path().to_string(),
    }
}

pub fn redirect_uri(config: &AppConfig) -> String {
    format!("{}{}", config.site_url, REDIRECT_PATH)
}

/// Provider URL the browser is sent to at sign-in.
pub fn authorize_url(config: &AppConfig, state: &str) -> String {
    let oidc = &config.oidc;
    let redirect = redirect_uri(config);
    let base = format!("{}/authorize", oidc.issuer);
    url_with_query(
        &base,
        &[
            ("response_type", "code"),
            ("client_id", &oidc.client_id),
            ("redirect_uri", &redirect),
            ("scope", "openid profile email"),
            ("audience", &oidc.audience),
            ("state", state),
        ],
    )
    .unwrap_or(base)
}

/// Provider logout URL; the provider sends the browser back to the site root.
pub fn logout_url(config: &AppConfig) -> String {
    let base = format!("{}/v2/logout", config.oidc.issuer);
    url_with_query(
        &base,
        &[
            ("returnTo", &config.site_url),
            ("client_id", &config.oidc.client_id),
        ],
    )
    .unwrap_or(base)
}

/// Verifies an ID token signed with the client secret (HS256).
pub fn verify_id_token(
    id_token: &str,
    oidc: &OidcConfig,
) -> Result<IdTokenClaims, jsonwebtoken::errors::Error> {
    let key = DecodingKey::from_secret(oidc.client_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[oidc.client_id.as_str()]);
    // Auth0 issuers carry a trailing slash.
    validation.set_issuer(&[format!("{}/", oidc.issuer), oidc.issuer.clone()]);
    decode::<IdTokenClaims>(id_token, &key, &validation).map(|data| data.claims)
}

/// complete_login
///
/// Exchanges an authorization code for tokens, verifies the ID token and fetches the
/// userinfo document.
pub async fn complete_login(
    client: &reqwest::Client,
    config: &AppConfig,
    code: &str,
) -> Result<CompletedLogin, OidcError> {
    let oidc = &config.oidc;
    let redirect = redirect_uri(config);

    let response = client
        .post(format!("{}/oauth/token", oidc.issuer))
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", oidc.client_id.as_str()),
            ("client_secret", oidc.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OidcError::Status(response.status()));
    }
    let tokens: TokenResponse = response.json().await?;

    let claims = verify_id_token(&tokens.id_token, oidc)?;

    let response = client
        .get(format!("{}/userinfo", oidc.issuer))
        .bearer_auth(&tokens.access_token)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OidcError::Status(response.status()));
    }
    let userinfo: UserInfo = response.json().await?;

    tracing::info!(sub = %claims.sub, "login completed");

    Ok(CompletedLogin {
        claims,
        id_token_jwt: tokens.id_token,
        access_token: tokens.access_token,
        userinfo,
    })
}
