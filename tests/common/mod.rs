#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use chrono::Utc;
use lando_ui::{
    AppConfig, AppState, LandoApiState, create_router,
    landoapi::{ApiCredentials, ApiRequest, LandoApi, LandoApiError, Operation},
    models::UserInfo,
    session::{SESSION_COOKIE, Session, encode_session},
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// --- Lando API double ---

/// Minimal stack that renders the stack page for D1.
pub fn default_stack_response() -> Value {
    json!({
        "edges": [],
        "landable_paths": [["PHID-DREV-phoo"]],
        "revisions": [
            {
                "phid": "PHID-DREV-phoo",
                "id": "D1",
                "diff": {
                    "id": 1,
                    "author": "Wobble"
                },
                "repo_phid": "PHID-REPO-repo",
                "status": {
                    "closed": false,
                    "display": "Needs Review",
                    "value": "needs-review"
                },
                "is_secure": false
            }
        ],
        "repositories": []
    })
}

/// Canned Lando API responses, dispatched on the operation. Every call is recorded.
pub struct LandoApiDouble {
    pub stack_response: Value,
    pub stack_failure: Option<StatusCode>,
    pub dryrun_response: Value,
    pub transplants_response: Value,
    pub post_transplant_response: Value,
    pub post_alt_commit_message_response: Value,
    /// When set, `submitSanitizedCommitMessage` fails with this status and detail.
    pub alt_commit_message_failure: Option<(StatusCode, Option<String>)>,
    calls: Mutex<Vec<(ApiCredentials, ApiRequest)>>,
}

impl Default for LandoApiDouble {
    fn default() -> Self {
        Self {
            stack_response: default_stack_response(),
            stack_failure: None,
            dryrun_response: json!({}),
            transplants_response: json!({}),
            post_transplant_response: json!({ "id": 1 }),
            post_alt_commit_message_response: json!({}),
            alt_commit_message_failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl LandoApiDouble {
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn credentials(&self) -> Vec<ApiCredentials> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(credentials, _)| credentials.clone())
            .collect()
    }

    pub fn calls_to(&self, operation: &Operation) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|call| &call.operation == operation)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn problem(status: StatusCode, detail: Option<String>) -> LandoApiError {
    LandoApiError::Api {
        status,
        title: status.canonical_reason().unwrap_or("Error").to_string(),
        detail,
        problem_type: None,
        instance: None,
    }
}

#[async_trait]
impl LandoApi for LandoApiDouble {
    async fn request(
        &self,
        credentials: &ApiCredentials,
        request: ApiRequest,
    ) -> Result<Value, LandoApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((credentials.clone(), request.clone()));

        match &request.operation {
            Operation::Stack { .. } => match self.stack_failure {
                Some(status) => Err(problem(status, None)),
                None => Ok(self.stack_response.clone()),
            },
            Operation::Transplants { .. } if request.method == axum::http::Method::GET => {
                Ok(self.transplants_response.clone())
            }
            Operation::Transplants { .. } => Ok(self.post_transplant_response.clone()),
            Operation::TransplantsDryrun => Ok(self.dryrun_response.clone()),
            Operation::SubmitSanitizedCommitMessage => match &self.alt_commit_message_failure {
                Some((status, detail)) => Err(problem(*status, detail.clone())),
                None => Ok(self.post_alt_commit_message_response.clone()),
            },
        }
    }
}

// --- Configuration & sessions ---

pub fn test_config() -> AppConfig {
    AppConfig {
        enable_sec_approval: true,
        ..AppConfig::default()
    }
}

/// A session for a user who has just authenticated with Auth0.
pub fn authenticated_session() -> Session {
    Session {
        id_token: Some("foo_id_token".to_string()),
        access_token: Some("foo_access_token".to_string()),
        userinfo: Some(UserInfo {
            picture: Some(String::new()),
            ..UserInfo::default()
        }),
        // Both needed for the session to count as fresh and authenticated.
        id_token_jwt: Some("foo_jwt".to_string()),
        last_authenticated: Some(Utc::now().timestamp()),
        ..Session::default()
    }
}

/// A session for an anonymous user.
pub fn anonymous_session() -> Session {
    let session = Session::default();
    assert!(session.keys().is_empty());
    session
}

// --- In-process application ---

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// The session cookie value set by the response, `Some("")` when it was cleared.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
    }
}

/// The router plus the double behind it. Each request carries its session explicitly,
/// so nothing leaks between simulated requests.
pub struct TestApp {
    pub router: Router,
    pub api: Arc<LandoApiDouble>,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new(api: LandoApiDouble, config: AppConfig) -> Self {
        let api = Arc::new(api);
        let state = AppState::new(api.clone() as LandoApiState, config.clone());
        Self {
            router: create_router(state),
            api,
            config,
        }
    }

    pub fn with_api(api: LandoApiDouble) -> Self {
        Self::new(api, test_config())
    }

    /// Encodes a session into the cookie value the router accepts.
    pub fn cookie_for(&self, session: &Session) -> String {
        encode_session(session, &self.config).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, cookie));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        cookie: Option<&str>,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, cookie));
        }
        self.send(builder.body(Body::from(form_body(fields))).unwrap())
            .await
    }

    /// Follows a redirect with the cookie the redirect set, falling back to `cookie`.
    pub async fn follow(&self, response: &TestResponse, cookie: Option<&str>) -> TestResponse {
        let location = response.location().expect("response is not a redirect");
        let next_cookie = response.session_cookie().or(cookie.map(str::to_string));
        self.get(location, next_cookie.as_deref().filter(|c| !c.is_empty()))
            .await
    }
}

pub fn form_body(fields: &[(&str, &str)]) -> String {
    let mut url = reqwest::Url::parse("http://localhost/").unwrap();
    url.query_pairs_mut().extend_pairs(fields);
    url.query().unwrap_or("").to_string()
}
