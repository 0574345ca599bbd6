use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    auth::Viewer,
    forms::{self, FieldErrors},
    landoapi::LandoApiError,
    oidc::OidcError,
    session::SessionError,
    templates::{self, Layout},
};

/// AppError
///
/// Every failure a page handler can surface. Converted into an HTML error page; the
/// process never goes down because of a single request.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Revision {0} does not exist or you do not have access to it")]
    RevisionNotFound(String),

    #[error("Not found")]
    NotFound,

    #[error("{}", forms::error_messages(.0).join("\n"))]
    Validation(FieldErrors),

    #[error("The form has expired or was not submitted from Lando. Reload the page and try again.")]
    Csrf,

    #[error(transparent)]
    LandoApi(#[from] LandoApiError),

    #[error("Login failed: {0}")]
    Login(#[from] OidcError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RevisionNotFound(_) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Csrf => StatusCode::BAD_REQUEST,
            AppError::LandoApi(LandoApiError::Api { status, .. }) if status.is_client_error() => {
                *status
            }
            AppError::LandoApi(_) => StatusCode::BAD_GATEWAY,
            AppError::Login(OidcError::StateMismatch) => StatusCode::BAD_REQUEST,
            AppError::Login(_) => StatusCode::BAD_GATEWAY,
            AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            AppError::RevisionNotFound(_) => "Revision not found",
            AppError::NotFound => "Page not found",
            AppError::Validation(_) | AppError::Csrf => "Invalid submission",
            AppError::LandoApi(_) => "Lando API error",
            AppError::Login(_) => "Login failed",
            AppError::Session(_) => "Something went wrong",
        }
    }

    fn user_message(&self) -> String {
        match self {
            AppError::LandoApi(e) => e
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| "Lando API could not complete the request.".to_string()),
            AppError::Session(_) => "Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::info!(error = %self, status = status.as_u16(), "request rejected");
        }

        let layout = Layout {
            title: self.heading().to_string(),
            viewer: Viewer::Anonymous,
            current_path: "/".to_string(),
            flashes: Vec::new(),
        };
        let html = templates::error_page(&layout, self.heading(), &self.user_message());

        (status, Html(html)).into_response()
    }
}
