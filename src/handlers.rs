use crate::{
    AppState,
    auth::{AuthUser, Viewer},
    error::AppError,
    forms::{
        self, AltCommitMessageForm, SettingsChange, TransplantRequestForm, UserSettingsForm,
    },
    landoapi::{ApiRequest, LandoApiError, Operation},
    models::{DryRun, LandingPathEntry, Repository, Revision, Stack, Transplant},
    oidc::{self, OidcError},
    session::{FlashCategory, Session, SessionCookie},
    stacks,
    templates::{self, Layout, StackPage},
};
use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

// --- Query Structs ---

/// SigninQuery
///
/// `GET /signin?next=/D1/`: where to return after login.
#[derive(Deserialize, Default)]
pub struct SigninQuery {
    pub next: Option<String>,
}

/// CallbackQuery
///
/// Parameters the identity provider appends to `/redirect_uri`.
#[derive(Deserialize, Default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// --- Helpers ---

/// Parses a `D<number>` monogram into its number.
pub fn parse_revision_id(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix('D')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn stack_path(revision_id: &str) -> String {
    format!("/{}/", revision_id)
}

fn layout(title: String, viewer: Viewer, current_path: String, session: &mut Session) -> Layout {
    Layout {
        title,
        viewer,
        current_path,
        flashes: session.take_flashes(),
    }
}

// --- Handlers ---

/// home
///
/// [Public Route] Landing page showing the sign-in state.
pub async fn home(State(state): State<AppState>, mut session: Session) -> Result<Response, AppError> {
    let viewer = Viewer::from_session(&session, &state.config);
    let had_flashes = !session.flashes.is_empty();
    let layout = layout("Home".to_string(), viewer, "/".to_string(), &mut session);
    let html = Html(templates::home_page(&layout));

    if had_flashes {
        Ok((SessionCookie::save(&session, &state.config)?, html).into_response())
    } else {
        Ok(html.into_response())
    }
}

/// get_stack
///
/// [Public Route] Renders the stack containing a revision.
///
/// Anonymous viewers see the stack and its landing history. Authenticated viewers also get
/// a dry run of the landable series, the landing form, and, for secure revisions, the
/// sanitized commit message form.
pub async fn get_stack(
    State(state): State<AppState>,
    Path(raw_revision_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    mut session: Session,
) -> Result<Response, AppError> {
    let number = parse_revision_id(&raw_revision_id)
        .ok_or_else(|| AppError::RevisionNotFound(raw_revision_id.clone()))?;
    let revision_id = format!("D{}", number);

    let config = &state.config;
    let viewer = Viewer::from_session(&session, config);
    let credentials = viewer.credentials(&session);

    // 1. The whole stack.
    let stack_request = ApiRequest::get(Operation::Stack {
        revision_id: revision_id.clone(),
    });
    let stack: Stack = match state.api.request(&credentials, stack_request).await {
        Ok(value) => {
            serde_json::from_value(value).map_err(|e| LandoApiError::Decode(e.to_string()))?
        }
        Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
            return Err(AppError::RevisionNotFound(revision_id));
        }
        Err(e) => return Err(e.into()),
    };

    let revisions: HashMap<&str, &Revision> = stack
        .revisions
        .iter()
        .map(|r| (r.phid.as_str(), r))
        .collect();
    let current = stack
        .revisions
        .iter()
        .find(|r| r.id == revision_id)
        .ok_or_else(|| AppError::RevisionNotFound(revision_id.clone()))?;

    // 2. Previous landings of this stack.
    let transplants_request = ApiRequest::get(Operation::Transplants {
        stack_revision_id: Some(revision_id.clone()),
    });
    let transplants = Transplant::list_from(state.api.request(&credentials, transplants_request).await?);

    // 3. The series that would land, checked by a dry run.
    let landable = stacks::landable_series(&stack, &current.phid);
    let mut errors = Vec::new();
    let mut dryrun: Option<DryRun> = None;
    let mut series: Option<Vec<Revision>> = None;
    let mut landing_path_json = None;
    let mut target_repo: Option<Repository> = None;

    if let (Some(path), true) = (&landable.series, viewer.is_authenticated()) {
        let landing_path: Vec<LandingPathEntry> = path
            .iter()
            .filter_map(|phid| revisions.get(phid.as_str()))
            .map(|r| LandingPathEntry {
                revision_id: r.id.clone(),
                diff_id: r.diff.id,
            })
            .collect();

        let dryrun_request = ApiRequest::post(Operation::TransplantsDryrun)
            .require_auth0()
            .json(json!({ "landing_path": landing_path }));
        let checked = state
            .api
            .request(&credentials, dryrun_request)
            .await
            .and_then(|value| {
                serde_json::from_value::<DryRun>(value)
                    .map_err(|e| LandoApiError::Decode(e.to_string()))
            });
        match checked {
            Ok(result) => {
                dryrun = Some(result);
                // Only a checked series may be offered for landing.
                landing_path_json = serde_json::to_string(&landing_path).ok();
            }
            Err(e) => {
                tracing::warn!(revision = %revision_id, error = %e, "landing dry run failed");
                errors.push(
                    e.detail()
                        .unwrap_or("Lando API could not check this stack for landing.")
                        .to_string(),
                );
            }
        }

        let tip_first: Vec<Revision> = path
            .iter()
            .rev()
            .filter_map(|phid| revisions.get(phid.as_str()).map(|r| (*r).clone()))
            .collect();
        target_repo = tip_first
            .first()
            .and_then(|tip| tip.repo_phid.as_deref())
            .and_then(|repo_phid| stack.repositories.iter().find(|r| r.phid == repo_phid))
            .cloned();
        series = Some(tip_first);
    }

    // 4. Display order: children above parents.
    let rows: Vec<Revision> = stacks::topological_order(&stack)
        .iter()
        .rev()
        .filter_map(|phid| revisions.get(phid.as_str()).map(|r| (*r).clone()))
        .collect();

    let use_sec_approval_workflow = config.enable_sec_approval
        && viewer.is_authenticated()
        && (params.contains_key("treat_as_secure")
            || current.is_secure
            || dryrun
                .as_ref()
                .is_some_and(|d| d.secure_revisions.contains(&current.phid)));

    // 5. Session bookkeeping: pending flashes are shown once, forms need a CSRF token.
    let had_flashes = !session.flashes.is_empty();
    let (csrf_token, minted) = if viewer.is_authenticated() {
        let (token, minted) = session.ensure_csrf_token();
        (Some(token), minted)
    } else {
        (None, false)
    };

    let page = StackPage {
        layout: layout(
            format!("Stack for {}", revision_id),
            viewer,
            stack_path(&revision_id),
            &mut session,
        ),
        revision_phid: current.phid.clone(),
        revision_id,
        rows,
        landable: landable.landable.into_iter().collect(),
        series,
        dryrun,
        target_repo,
        transplants,
        use_sec_approval_workflow,
        csrf_token,
        landing_path_json,
        errors,
    };
    let html = Html(templates::stack_page(&page));

    if had_flashes || minted {
        Ok((SessionCookie::save(&session, config)?, html).into_response())
    } else {
        Ok(html.into_response())
    }
}

/// legacy_revision_redirect
///
/// [Public Route] Old revision URLs (`/revisions/D1/` and `/revisions/D1/<diff>/`) moved
/// to the stack page.
pub async fn legacy_revision_redirect(
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let raw = params.get("revision_id").cloned().unwrap_or_default();
    let number = parse_revision_id(&raw).ok_or(AppError::RevisionNotFound(raw))?;
    Ok((
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, stack_path(&format!("D{}", number)))],
    )
        .into_response())
}

/// submit_sanitized_commit_message
///
/// [Authenticated Route] Stores the sanitized commit message of a secure revision.
///
/// The form is validated before Lando API is contacted. Success and API failures both
/// return to the stack page with a flash message; identity fields of the session are
/// left alone either way.
pub async fn submit_sanitized_commit_message(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_revision_id): Path<String>,
    mut session: Session,
    Form(form): Form<AltCommitMessageForm>,
) -> Result<Response, AppError> {
    let config = &state.config;
    if !config.enable_sec_approval {
        return Err(AppError::NotFound);
    }

    let number = parse_revision_id(&raw_revision_id)
        .ok_or(AppError::RevisionNotFound(raw_revision_id))?;
    let revision_id = format!("D{}", number);

    if !forms::verify_csrf(config, &session, &form.csrf_token) {
        return Err(AppError::Csrf);
    }
    form.validate().map_err(AppError::Validation)?;

    let phid = form.phid.trim().to_string();
    let message = form.alt_commit_message;
    let credentials = Viewer::Authenticated(user).credentials(&session);

    let request = ApiRequest::post(Operation::SubmitSanitizedCommitMessage)
        .require_auth0()
        .json(json!({
            "revision_phid": phid,
            "sanitized_message": message,
        }));

    match state.api.request(&credentials, request).await {
        Ok(_) => {
            tracing::info!(revision = %revision_id, "sanitized commit message submitted");
            session.flash(
                FlashCategory::Success,
                format!(
                    "New commit message for revision {} set to: {}",
                    revision_id, message
                ),
            );
        }
        Err(e) => {
            tracing::warn!(revision = %revision_id, error = %e, "sanitized commit message rejected");
            session.flash(
                FlashCategory::Error,
                e.detail()
                    .unwrap_or("The sanitized commit message could not be saved. Please try again.")
                    .to_string(),
            );
        }
    }

    Ok((
        SessionCookie::save(&session, config)?,
        Redirect::to(&stack_path(&revision_id)),
    )
        .into_response())
}

/// request_landing
///
/// [Authenticated Route] Asks Lando API to land the series shown on the stack page.
pub async fn request_landing(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_revision_id): Path<String>,
    mut session: Session,
    Form(form): Form<TransplantRequestForm>,
) -> Result<Response, AppError> {
    let config = &state.config;
    let number = parse_revision_id(&raw_revision_id)
        .ok_or(AppError::RevisionNotFound(raw_revision_id))?;
    let revision_id = format!("D{}", number);

    if !forms::verify_csrf(config, &session, &form.csrf_token) {
        return Err(AppError::Csrf);
    }

    match form.validate() {
        Err(errors) => {
            for message in forms::error_messages(&errors) {
                session.flash(FlashCategory::Error, message);
            }
        }
        Ok(landing_path) => {
            let credentials = Viewer::Authenticated(user).credentials(&session);
            let request = ApiRequest::post(Operation::Transplants {
                stack_revision_id: None,
            })
            .require_auth0()
            .json(json!({
                "landing_path": landing_path,
                "confirmation_token": form.confirmation_token(),
            }));

            match state.api.request(&credentials, request).await {
                Ok(_) => {
                    tracing::info!(revision = %revision_id, "landing requested");
                    session.flash(FlashCategory::Success, "Landing requested.");
                }
                Err(e) => {
                    // Problems without a detail are not meant for the user.
                    let Some(detail) = e.detail().map(str::to_string) else {
                        return Err(e.into());
                    };
                    session.flash(FlashCategory::Error, detail);
                }
            }
        }
    }

    Ok((
        SessionCookie::save(&session, config)?,
        Redirect::to(&stack_path(&revision_id)),
    )
        .into_response())
}

/// update_settings
///
/// [Authenticated Route] Stores or clears the Phabricator API token used for Lando API
/// calls. Answers JSON for the settings modal.
pub async fn update_settings(
    _user: AuthUser,
    State(state): State<AppState>,
    mut session: Session,
    Form(form): Form<UserSettingsForm>,
) -> Result<Response, AppError> {
    let config = &state.config;

    if !forms::verify_csrf(config, &session, &form.csrf_token) {
        let body = json!({
            "success": false,
            "errors": { "csrf_token": ["The CSRF token is missing or invalid."] },
        });
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    match form.validate() {
        Err(errors) => {
            let body = json!({ "success": false, "errors": errors });
            Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
        }
        Ok(change) => {
            match change {
                SettingsChange::Reset => session.phabricator_api_token = None,
                SettingsChange::SetToken(token) => session.phabricator_api_token = Some(token),
                SettingsChange::Unchanged => {}
            }
            let body = json!({ "success": true, "errors": {} });
            Ok((SessionCookie::save(&session, config)?, Json(body)).into_response())
        }
    }
}

/// signin
///
/// [Public Route] Starts the OIDC authorization code flow.
pub async fn signin(
    State(state): State<AppState>,
    Query(query): Query<SigninQuery>,
    mut session: Session,
) -> Result<Response, AppError> {
    let login_state = uuid::Uuid::new_v4().simple().to_string();
    session.oidc_state = Some(login_state.clone());
    session.oidc_next = query.next.filter(|next| oidc::is_local_path(next));

    Ok((
        SessionCookie::save(&session, &state.config)?,
        Redirect::to(&oidc::authorize_url(&state.config, &login_state)),
    )
        .into_response())
}

/// oidc_callback
///
/// [Public Route] Completes login: checks `state`, exchanges the code, and stores the
/// identity in the session.
pub async fn oidc_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    mut session: Session,
) -> Result<Response, AppError> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or(error);
        return Err(OidcError::Provider(description).into());
    }

    let expected = session.oidc_state.take();
    if expected.is_none() || expected != query.state {
        return Err(OidcError::StateMismatch.into());
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OidcError::Provider("no authorization code returned".to_string()))?;

    let login = oidc::complete_login(&state.http, &state.config, &code).await?;
    login.apply_to(&mut session);
    // A fresh login gets a fresh CSRF token on the next page view.
    session.csrf_token = None;

    let next = session
        .oidc_next
        .take()
        .filter(|next| oidc::is_local_path(next))
        .unwrap_or_else(|| "/".to_string());

    Ok((
        SessionCookie::save(&session, &state.config)?,
        Redirect::to(&next),
    )
        .into_response())
}

/// signout
///
/// [Public Route] Destroys the session and logs out of the identity provider.
pub async fn signout(State(state): State<AppState>) -> Response {
    (
        SessionCookie::clear(&state.config),
        Redirect::to(&oidc::logout_url(&state.config)),
    )
        .into_response()
}
