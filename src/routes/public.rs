use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Pages any browser may load. Anonymous viewers get read-only pages; anything that
/// needs the viewer's Auth0 token is decided inside the handler via `Viewer`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // GET /
        .route("/", get(handlers::home))
        // GET /D{n}/
        // The stack page: revisions, landing history and, for authenticated viewers,
        // the landing and sanitized commit message forms.
        .route("/{revision_id}/", get(handlers::get_stack))
        // GET /revisions/D{n}/ and /revisions/D{n}/{diff_id}/
        // Old revision page URLs, permanently redirected to the stack page.
        .route(
            "/revisions/{revision_id}/",
            get(handlers::legacy_revision_redirect),
        )
        .route(
            "/revisions/{revision_id}/{diff_id}/",
            get(handlers::legacy_revision_redirect),
        )
        // OIDC login round trip and logout.
        .route("/signin", get(handlers::signin))
        .route("/redirect_uri", get(handlers::oidc_callback))
        .route("/signout", get(handlers::signout))
}
