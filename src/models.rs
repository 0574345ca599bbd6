use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Lando API payloads (GET stacks/<id>) ---

/// Stack
///
/// The dependency graph of a series of revisions, as returned by `GET stacks/D<n>`.
/// Fetched as a unit on every page view and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Stack {
    /// `[child, parent]` PHID pairs.
    #[serde(default)]
    pub edges: Vec<[String; 2]>,
    /// Every path of revisions that could be landed, root first.
    #[serde(default)]
    pub landable_paths: Vec<Vec<String>>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

/// Revision
///
/// A single proposed change under review.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Revision {
    pub phid: String,
    /// Monogram, e.g. "D1".
    pub id: String,
    pub diff: Diff,
    #[serde(default)]
    pub repo_phid: Option<String>,
    pub status: RevisionStatus,
    // Secure revisions need a sanitized commit message before landing.
    #[serde(default)]
    pub is_secure: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
}

impl Revision {
    /// The numeric part of the monogram, used to break ties when ordering a stack.
    pub fn number(&self) -> u64 {
        self.id
            .strip_prefix('D')
            .and_then(|n| n.parse().ok())
            .unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Diff {
    pub id: u64,
    #[serde(default)]
    pub author: Option<DiffAuthor>,
}

/// DiffAuthor
///
/// Lando API reports either a bare display name or a name/email pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DiffAuthor {
    Name(String),
    Person {
        #[serde(default)]
        name: String,
        #[serde(default)]
        email: String,
    },
}

impl DiffAuthor {
    pub fn display_name(&self) -> &str {
        match self {
            DiffAuthor::Name(name) => name,
            DiffAuthor::Person { name, email } if name.is_empty() => email,
            DiffAuthor::Person { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RevisionStatus {
    pub closed: bool,
    pub display: String,
    pub value: RevisionStatusValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionStatusValue {
    NeedsReview,
    Accepted,
    ChangesPlanned,
    NeedsRevision,
    Published,
    Abandoned,
    Draft,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Repository
///
/// Target repository of a revision; `landing_supported` is false for repositories
/// Lando cannot land to.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Repository {
    pub phid: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub landing_supported: bool,
}

// --- Transplants ---

/// Transplant
///
/// A landing request known to Lando API. Only listed by this front-end.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Transplant {
    pub id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub requester_email: String,
    #[serde(default)]
    pub tree: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl Transplant {
    /// Parses the `GET transplants` body. Anything other than a list means
    /// there is nothing to show.
    pub fn list_from(value: Value) -> Vec<Transplant> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// DryRun
///
/// Result of `POST transplants/dryrun`. Every field may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DryRun {
    pub confirmation_token: Option<String>,
    pub blocker: Option<String>,
    pub warnings: Vec<LandingWarning>,
    #[serde(rename = "secureRevisions")]
    pub secure_revisions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LandingWarning {
    pub id: i64,
    pub display: String,
    pub instances: Vec<Value>,
}

/// LandingPathEntry
///
/// One element of the landing path sent to `transplants` and `transplants/dryrun`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LandingPathEntry {
    pub revision_id: String,
    pub diff_id: u64,
}

/// UserInfo
///
/// Subset of the OIDC userinfo document shown in the page header.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct UserInfo {
    pub sub: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

impl UserInfo {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("Signed in")
    }
}
