mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{LandoApiDouble, TestApp, authenticated_session, test_config};
use lando_ui::{
    AppConfig,
    landoapi::{ApiRequest, Operation},
};
use serde_json::json;

/// D1 <- D2 <- D3, with D2 and D3 landable.
fn three_revision_stack() -> serde_json::Value {
    let revision = |phid: &str, id: &str, diff: u64| {
        json!({
            "phid": phid,
            "id": id,
            "diff": { "id": diff, "author": { "name": "Wobble", "email": "wobble@example.com" } },
            "repo_phid": "PHID-REPO-repo",
            "status": { "closed": false, "display": "Accepted", "value": "accepted" },
            "title": format!("Revision {}", id),
            "is_secure": false
        })
    };
    json!({
        "edges": [["PHID-DREV-2", "PHID-DREV-1"], ["PHID-DREV-3", "PHID-DREV-2"]],
        "landable_paths": [["PHID-DREV-1", "PHID-DREV-2", "PHID-DREV-3"]],
        "revisions": [
            revision("PHID-DREV-3", "D3", 30),
            revision("PHID-DREV-1", "D1", 10),
            revision("PHID-DREV-2", "D2", 20)
        ],
        "repositories": [
            { "phid": "PHID-REPO-repo", "short_name": "mozilla-central", "url": "https://hg.example.com/mozilla-central", "landing_supported": true }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::with_api(LandoApiDouble::default());

    let response = app.get("/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(app.api.calls().is_empty());
}

#[tokio::test]
async fn test_home_page_offers_login_to_anonymous_users() {
    let app = TestApp::with_api(LandoApiDouble::default());

    let response = app.get("/", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("href=\"/signin?next=%2F\""));
}

#[tokio::test]
async fn test_anonymous_view_fetches_stack_and_transplants_only() {
    let app = TestApp::with_api(LandoApiDouble::default());

    let response = app.get("/D1/", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        app.api.calls(),
        vec![
            ApiRequest::get(Operation::Stack {
                revision_id: "D1".to_string()
            }),
            ApiRequest::get(Operation::Transplants {
                stack_revision_id: Some("D1".to_string())
            }),
        ]
    );
    // Never a bearer token for anonymous viewers.
    assert!(
        app.api
            .credentials()
            .iter()
            .all(|c| c.auth0_access_token.is_none())
    );
    assert!(response.body.contains("Log in to request a landing."));
    // Nothing to remember, so no cookie.
    assert!(response.session_cookie().is_none());
}

#[tokio::test]
async fn test_authenticated_view_runs_dry_run_for_landable_series() {
    let mut api = LandoApiDouble::default();
    api.stack_response = three_revision_stack();
    api.dryrun_response = json!({ "confirmation_token": "confirm-me", "warnings": [] });
    let app = TestApp::with_api(api);
    let cookie = app.cookie_for(&authenticated_session());

    let response = app.get("/D2/", Some(&cookie)).await;

    assert_eq!(response.status, StatusCode::OK);

    let dryruns = app.api.calls_to(&Operation::TransplantsDryrun);
    assert_eq!(dryruns.len(), 1);
    assert_eq!(dryruns[0].method, Method::POST);
    assert!(dryruns[0].require_auth0);
    // Root first, ending at the viewed revision.
    assert_eq!(
        dryruns[0].json,
        Some(json!({
            "landing_path": [
                { "revision_id": "D1", "diff_id": 10 },
                { "revision_id": "D2", "diff_id": 20 }
            ]
        }))
    );

    assert!(response.body.contains("id=\"landingForm\""));
    assert!(response.body.contains("value=\"confirm-me\""));
    assert!(response.body.contains("mozilla-central"));
    // A CSRF token is minted for the forms and persisted.
    assert!(response.session_cookie().is_some_and(|c| !c.is_empty()));
}

#[tokio::test]
async fn test_stack_rows_list_children_above_parents() {
    let mut api = LandoApiDouble::default();
    api.stack_response = three_revision_stack();
    let app = TestApp::with_api(api);

    let response = app.get("/D1/", None).await;

    let d3 = response.body.find("data-phid=\"PHID-DREV-3\"").unwrap();
    let d2 = response.body.find("data-phid=\"PHID-DREV-2\"").unwrap();
    let d1 = response.body.find("data-phid=\"PHID-DREV-1\"").unwrap();
    assert!(d3 < d2 && d2 < d1);
}

#[tokio::test]
async fn test_dry_run_blocker_hides_landing_form() {
    let mut api = LandoApiDouble::default();
    api.dryrun_response = json!({ "blocker": "The stack has open parents." });
    let app = TestApp::with_api(api);
    let cookie = app.cookie_for(&authenticated_session());

    let response = app.get("/D1/", Some(&cookie)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("The stack has open parents."));
    assert!(!response.body.contains("id=\"landingForm\""));
}

#[tokio::test]
async fn test_undecodable_dry_run_is_reported_and_hides_landing_form() {
    let mut api = LandoApiDouble::default();
    api.dryrun_response = json!({ "blocker": "Landing is blocked", "warnings": "not-a-list" });
    let app = TestApp::with_api(api);
    let cookie = app.cookie_for(&authenticated_session());

    let response = app.get("/D1/", Some(&cookie)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("class=\"StackPage-errors\""));
    assert!(response.body.contains("Lando API could not check this stack for landing."));
    assert!(!response.body.contains("id=\"landingForm\""));
}

#[tokio::test]
async fn test_transplant_history_is_listed() {
    let mut api = LandoApiDouble::default();
    api.transplants_response = json!([
        { "id": 7, "status": "LANDED", "requester_email": "tuser@example.com", "tree": "mozilla-central" }
    ]);
    let app = TestApp::with_api(api);

    let response = app.get("/D1/", None).await;

    assert!(response.body.contains("Transplant #7: LANDED by tuser@example.com"));
}

#[tokio::test]
async fn test_unknown_revision_is_not_found() {
    let mut api = LandoApiDouble::default();
    api.stack_failure = Some(StatusCode::NOT_FOUND);
    let app = TestApp::with_api(api);

    let response = app.get("/D404/", None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body.contains("D404"));
}

#[tokio::test]
async fn test_revision_missing_from_stack_is_not_found() {
    let app = TestApp::with_api(LandoApiDouble::default());

    let response = app.get("/D2/", None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_revision_id_is_not_found_without_api_call() {
    let app = TestApp::with_api(LandoApiDouble::default());

    for uri in ["/1/", "/Dabc/", "/D/"] {
        let response = app.get(uri, None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{}", uri);
    }
    assert!(app.api.calls().is_empty());
}

#[tokio::test]
async fn test_lando_api_outage_is_bad_gateway() {
    let mut api = LandoApiDouble::default();
    api.stack_failure = Some(StatusCode::INTERNAL_SERVER_ERROR);
    let app = TestApp::with_api(api);

    let response = app.get("/D1/", None).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_legacy_revision_urls_redirect_permanently() {
    let app = TestApp::with_api(LandoApiDouble::default());

    let response = app.get("/revisions/D1/", None).await;
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.location(), Some("/D1/"));

    let response = app.get("/revisions/D1/2/", None).await;
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.location(), Some("/D1/"));
}

#[tokio::test]
async fn test_stale_session_is_treated_as_anonymous() {
    let app = TestApp::with_api(LandoApiDouble::default());
    let mut session = authenticated_session();
    session.last_authenticated = Some(Utc::now().timestamp() - test_config().auth_freshness_secs - 1);
    let cookie = app.cookie_for(&session);

    let response = app.get("/D1/", Some(&cookie)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(app.api.calls_to(&Operation::TransplantsDryrun).is_empty());
    assert!(response.body.contains("Log in to request a landing."));
}

#[tokio::test]
async fn test_tampered_cookie_is_treated_as_anonymous() {
    let app = TestApp::with_api(LandoApiDouble::default());
    let other = TestApp::new(
        LandoApiDouble::default(),
        AppConfig {
            session_secret: "some-other-secret".to_string(),
            ..test_config()
        },
    );
    let forged = other.cookie_for(&authenticated_session());

    let response = app.get("/D1/", Some(&forged)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(
        app.api
            .credentials()
            .iter()
            .all(|c| c.auth0_access_token.is_none())
    );
}

#[tokio::test]
async fn test_request_landing_posts_transplant() {
    let app = TestApp::new(
        LandoApiDouble::default(),
        AppConfig {
            csrf_enabled: false,
            ..test_config()
        },
    );
    let cookie = app.cookie_for(&authenticated_session());
    let landing_path = r#"[{"revision_id":"D1","diff_id":1}]"#;

    let response = app
        .post_form(
            "/D1/transplants",
            Some(&cookie),
            &[
                ("landing_path", landing_path),
                ("confirmation_token", "confirm-me"),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/D1/"));
    let expected = ApiRequest::post(Operation::Transplants {
        stack_revision_id: None,
    })
    .require_auth0()
    .json(json!({
        "landing_path": [{ "revision_id": "D1", "diff_id": 1 }],
        "confirmation_token": "confirm-me",
    }));
    assert_eq!(app.api.calls(), vec![expected]);

    let page = app.follow(&response, Some(&cookie)).await;
    assert!(page.body.contains("Landing requested."));
}

#[tokio::test]
async fn test_request_landing_with_bad_path_flashes_error() {
    let app = TestApp::new(
        LandoApiDouble::default(),
        AppConfig {
            csrf_enabled: false,
            ..test_config()
        },
    );
    let cookie = app.cookie_for(&authenticated_session());

    let response = app
        .post_form(
            "/D1/transplants",
            Some(&cookie),
            &[("landing_path", r#"[{"revision_id":"D1"}]"#)],
        )
        .await;

    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert!(app.api.calls().is_empty());

    let page = app.follow(&response, Some(&cookie)).await;
    assert!(page.body.contains("Landing path must be a JSON array of path objects"));
}
