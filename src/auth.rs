use axum::{
    extract::{FromRef, FromRequestParts},
    http::{Method, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use std::convert::Infallible;

use crate::{
    config::AppConfig,
    landoapi::ApiCredentials,
    models::UserInfo,
    oidc,
    session::Session,
};

// Clock skew tolerated on `last_authenticated` stamps from the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// AuthUser
///
/// The identity of a viewer whose session passed the freshness check. Usable as a
/// handler argument on gated routes; anonymous requests are redirected to sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub userinfo: UserInfo,
    /// Auth0 access token forwarded to Lando API as a bearer token.
    pub access_token: String,
    pub last_authenticated: i64,
}

/// Viewer
///
/// Either state of the auth gate. Extracting it never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Viewer {
    Anonymous,
    Authenticated(AuthUser),
}

impl Viewer {
    pub fn from_session(session: &Session, config: &AppConfig) -> Self {
        match authenticate(session, config, Utc::now().timestamp()) {
            Some(user) => Viewer::Authenticated(user),
            None => Viewer::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Viewer::Authenticated(_))
    }

    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Viewer::Authenticated(user) => Some(user),
            Viewer::Anonymous => None,
        }
    }

    /// Credentials for Lando API calls made on this viewer's behalf. The bearer token is
    /// only ever taken from an authenticated session.
    pub fn credentials(&self, session: &Session) -> ApiCredentials {
        ApiCredentials {
            auth0_access_token: self.user().map(|u| u.access_token.clone()),
            phabricator_api_token: session.phabricator_api_token.clone(),
        }
    }
}

/// authenticate
///
/// A session is authenticated when it holds an ID token, an access token, the userinfo
/// document, the raw ID token JWT, and a login timestamp inside the freshness window.
/// Any gap means anonymous.
pub fn authenticate(session: &Session, config: &AppConfig, now: i64) -> Option<AuthUser> {
    let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.is_empty());

    if !present(&session.id_token) || !present(&session.id_token_jwt) {
        return None;
    }
    let access_token = session.access_token.clone().filter(|t| !t.is_empty())?;
    let userinfo = session.userinfo.clone()?;
    let last_authenticated = session.last_authenticated?;

    let age = now - last_authenticated;
    if age > config.auth_freshness_secs || age < -MAX_CLOCK_SKEW_SECS {
        return None;
    }

    Some(AuthUser {
        userinfo,
        access_token,
        last_authenticated,
    })
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        let session = Session::from_request_parts(parts, state).await?;
        Ok(Viewer::from_session(&session, &config))
    }
}

/// AuthRedirect
///
/// Rejection for gated routes: send the browser to sign-in, remembering where it was.
#[derive(Debug)]
pub struct AuthRedirect {
    pub next: String,
}

impl IntoResponse for AuthRedirect {
    fn into_response(self) -> Response {
        Redirect::to(&oidc::local_path_with_query("/signin", &[("next", &self.next)]))
            .into_response()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthRedirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        let session = match Session::from_request_parts(parts, state).await {
            Ok(session) => session,
            Err(never) => match never {},
        };

        if let Viewer::Authenticated(user) = Viewer::from_session(&session, &config) {
            return Ok(user);
        }

        tracing::debug!(uri = %parts.uri, "anonymous request to a gated route");

        // A POST target is not a page to come back to; prefer the page the form was on.
        let next = if parts.method == Method::GET {
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string())
        } else {
            parts
                .headers
                .get(header::REFERER)
                .and_then(|v| v.to_str().ok())
                .and_then(|referer| referer.strip_prefix(config.site_url.as_str()))
                .filter(|path| oidc::is_local_path(path))
                .unwrap_or("/")
                .to_string()
        };

        Err(AuthRedirect { next })
    }
}
