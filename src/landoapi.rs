use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Header carrying the user's Phabricator API token to Lando API (`X-Phabricator-API-Key`).
pub const PHABRICATOR_API_KEY_HEADER: HeaderName =
    HeaderName::from_static("x-phabricator-api-key");

/// Operation
///
/// The fixed set of Lando API endpoints this front-end consumes. Each variant knows its
/// own path and query string, so an operation outside this set cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `stacks/D<n>`
    Stack { revision_id: String },
    /// `transplants`, optionally filtered to one stack.
    Transplants { stack_revision_id: Option<String> },
    /// `transplants/dryrun`
    TransplantsDryrun,
    /// `submitSanitizedCommitMessage`
    SubmitSanitizedCommitMessage,
}

impl Operation {
    /// Path relative to the Lando API base URL.
    pub fn path(&self) -> String {
        match self {
            Operation::Stack { revision_id } => format!("stacks/{}", revision_id),
            Operation::Transplants { .. } => "transplants".to_string(),
            Operation::TransplantsDryrun => "transplants/dryrun".to_string(),
            Operation::SubmitSanitizedCommitMessage => "submitSanitizedCommitMessage".to_string(),
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Operation::Transplants {
                stack_revision_id: Some(id),
            } => vec![("stack_revision_id", id.clone())],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// ApiRequest
///
/// One call to Lando API: `request(method, operation, require_auth0, json?)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub operation: Operation,
    /// Attach the Auth0 bearer token; the call fails without one.
    pub require_auth0: bool,
    pub json: Option<Value>,
}

impl ApiRequest {
    pub fn get(operation: Operation) -> Self {
        Self {
            method: Method::GET,
            operation,
            require_auth0: false,
            json: None,
        }
    }

    pub fn post(operation: Operation) -> Self {
        Self {
            method: Method::POST,
            operation,
            require_auth0: false,
            json: None,
        }
    }

    pub fn require_auth0(mut self) -> Self {
        self.require_auth0 = true;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// ApiCredentials
///
/// Per-request credentials taken from the viewer's session. Anonymous viewers never
/// carry an access token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiCredentials {
    pub auth0_access_token: Option<String>,
    pub phabricator_api_token: Option<String>,
}

/// LandoApiError
///
/// Failures of a single Lando API round trip.
#[derive(Debug, Error)]
pub enum LandoApiError {
    /// `require_auth0` was set but the session holds no access token.
    #[error("an Auth0 access token is required for {0}")]
    MissingAuth0Token(Operation),

    /// The request never produced an HTTP response.
    #[error("failed to communicate with Lando API: {0}")]
    Communication(#[source] reqwest::Error),

    /// Lando API answered with an error status, usually with an RFC 7807 problem body.
    #[error("Lando API returned {status}: {title}")]
    Api {
        status: StatusCode,
        title: String,
        detail: Option<String>,
        problem_type: Option<String>,
        instance: Option<String>,
    },

    /// A success response whose body was not JSON.
    #[error("Lando API returned an undecodable body: {0}")]
    Decode(String),
}

impl LandoApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            LandoApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// User-facing explanation supplied by Lando API, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            LandoApiError::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Problem
///
/// RFC 7807 problem document returned by Lando API on errors.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Problem {
    title: Option<String>,
    detail: Option<String>,
    #[serde(rename = "type")]
    problem_type: Option<String>,
    instance: Option<String>,
}

/// LandoApi
///
/// The contract for talking to Lando API. The HTTP implementation lives in
/// `HttpLandoApi`; tests swap in a double that records calls.
#[async_trait]
pub trait LandoApi: Send + Sync {
    async fn request(
        &self,
        credentials: &ApiCredentials,
        request: ApiRequest,
    ) -> Result<Value, LandoApiError>;
}

/// LandoApiState
///
/// Shared handle stored in `AppState`.
pub type LandoApiState = Arc<dyn LandoApi>;

/// HttpLandoApi
///
/// reqwest-backed client. One connection pool is shared by all requests.
#[derive(Clone)]
pub struct HttpLandoApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLandoApi {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn headers(
        &self,
        credentials: &ApiCredentials,
        request: &ApiRequest,
    ) -> Result<HeaderMap, LandoApiError> {
        let mut headers = HeaderMap::new();

        if request.require_auth0 {
            let token = credentials
                .auth0_access_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| LandoApiError::MissingAuth0Token(request.operation.clone()))?;
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| LandoApiError::MissingAuth0Token(request.operation.clone()))?;
            headers.insert(AUTHORIZATION, value);
        }

        if let Some(token) = credentials.phabricator_api_token.as_deref() {
            // A token that cannot be a header value was never valid; skip it.
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert(PHABRICATOR_API_KEY_HEADER, value);
            }
        }

        Ok(headers)
    }
}

#[async_trait]
impl LandoApi for HttpLandoApi {
    async fn request(
        &self,
        credentials: &ApiCredentials,
        request: ApiRequest,
    ) -> Result<Value, LandoApiError> {
        let headers = self.headers(credentials, &request)?;
        let url = format!("{}/{}", self.base_url, request.operation.path());

        tracing::debug!(
            method = %request.method,
            operation = %request.operation,
            require_auth0 = request.require_auth0,
            "Lando API request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .query(&request.operation.query());
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(operation = %request.operation, error = %e, "Lando API unreachable");
            LandoApiError::Communication(e)
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(LandoApiError::Communication)?;

        if !status.is_success() {
            let problem: Problem = serde_json::from_slice(&bytes).unwrap_or_default();
            tracing::info!(
                operation = %request.operation,
                status = status.as_u16(),
                "Lando API returned an error"
            );
            return Err(LandoApiError::Api {
                status,
                title: problem.title.unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Lando API error")
                        .to_string()
                }),
                detail: problem.detail,
                problem_type: problem.problem_type,
                instance: problem.instance,
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| LandoApiError::Decode(e.to_string()))
    }
}
