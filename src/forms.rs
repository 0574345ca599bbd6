use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::BTreeMap, sync::LazyLock};

use crate::{config::AppConfig, models::LandingPathEntry, session::Session};

static PHAB_API_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^api-[a-z0-9]{28}$").expect("valid token pattern"));

const REVISION_PHID_PREFIX: &str = "PHID-DREV-";

/// FieldErrors
///
/// Validation messages keyed by form field, in a stable order.
pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

/// Flattens field errors into the list shown on the page.
pub fn error_messages(errors: &FieldErrors) -> Vec<String> {
    errors.values().flatten().cloned().collect()
}

/// verify_csrf
///
/// Compares the submitted token with the one minted into the session. Skipped only when
/// CSRF protection is disabled, which configuration never allows in production.
pub fn verify_csrf(config: &AppConfig, session: &Session, submitted: &str) -> bool {
    if !config.csrf_enabled {
        return true;
    }
    match session.csrf_token.as_deref() {
        Some(expected) => !submitted.is_empty() && constant_time_eq(expected, submitted),
        None => false,
    }
}

/// Compares two tokens without exiting early on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// AltCommitMessageForm
///
/// The sanitized commit message form shown on secure revisions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AltCommitMessageForm {
    pub phid: String,
    pub alt_commit_message: String,
    pub csrf_token: String,
}

impl AltCommitMessageForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        let phid = self.phid.trim();
        if phid.len() <= REVISION_PHID_PREFIX.len() || !phid.starts_with(REVISION_PHID_PREFIX) {
            errors
                .entry("phid")
                .or_default()
                .push("A revision PHID is required".to_string());
        }
        if self.alt_commit_message.trim().is_empty() {
            errors
                .entry("alt_commit_message")
                .or_default()
                .push("The sanitized commit message cannot be empty".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// TransplantRequestForm
///
/// Hidden form carrying the landing path and the dry run's confirmation token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransplantRequestForm {
    pub landing_path: String,
    pub confirmation_token: String,
    pub csrf_token: String,
}

const LANDING_PATH_MESSAGE: &str = "Landing path must be a JSON array of path objects";

impl TransplantRequestForm {
    /// Decodes the landing path: a non-empty JSON array whose items have exactly a string
    /// `revision_id` and an integer `diff_id`.
    pub fn validate(&self) -> Result<Vec<LandingPathEntry>, FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.landing_path.trim().is_empty() {
            errors
                .entry("landing_path")
                .or_default()
                .push("A landing path is required".to_string());
            return Err(errors);
        }

        match parse_landing_path(&self.landing_path) {
            Some(path) => Ok(path),
            None => {
                errors
                    .entry("landing_path")
                    .or_default()
                    .push(LANDING_PATH_MESSAGE.to_string());
                Err(errors)
            }
        }
    }

    pub fn confirmation_token(&self) -> Option<&str> {
        Some(self.confirmation_token.as_str()).filter(|t| !t.is_empty())
    }
}

fn parse_landing_path(raw: &str) -> Option<Vec<LandingPathEntry>> {
    let Value::Array(items) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    items
        .into_iter()
        .map(|item| serde_json::from_value::<LandingPathEntry>(item).ok())
        .collect()
}

/// UserSettingsForm
///
/// Stores or removes the user's Phabricator API token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserSettingsForm {
    pub phab_api_token: String,
    pub reset_phab_api_token: Option<String>,
    pub csrf_token: String,
}

/// What a valid settings submission asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    Reset,
    SetToken(String),
    Unchanged,
}

impl UserSettingsForm {
    pub fn validate(&self) -> Result<SettingsChange, FieldErrors> {
        // HTML checkboxes submit "y"/"on" when ticked and nothing otherwise.
        let reset = self
            .reset_phab_api_token
            .as_deref()
            .is_some_and(|v| !v.is_empty() && v != "false");
        if reset {
            return Ok(SettingsChange::Reset);
        }

        let token = self.phab_api_token.trim();
        if token.is_empty() {
            return Ok(SettingsChange::Unchanged);
        }
        if !PHAB_API_TOKEN_RE.is_match(token) {
            let mut errors = FieldErrors::new();
            errors
                .entry("phab_api_token")
                .or_default()
                .push("Invalid API Token format".to_string());
            return Err(errors);
        }
        Ok(SettingsChange::SetToken(token.to_string()))
    }
}
