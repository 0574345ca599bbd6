use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Authenticated Router Module
///
/// Form submissions that act on the viewer's behalf. The `auth_middleware` route layer
/// and the `AuthUser` argument of each handler both send anonymous requests to sign-in,
/// so no handler here ever calls Lando API without a bearer token.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /D{n}/commit-message
        // Sanitized commit message for a secure revision (ENABLE_SEC_APPROVAL only).
        .route(
            "/{revision_id}/commit-message",
            post(handlers::submit_sanitized_commit_message),
        )
        // POST /D{n}/transplants
        // Requests a landing of the series previewed on the stack page.
        .route("/{revision_id}/transplants", post(handlers::request_landing))
        // POST /settings
        // Stores or clears the Phabricator API token.
        .route("/settings", post(handlers::update_settings))
}
