//! HTML rendering.
//!
//! Pages are assembled from view models built by the handlers. Every interpolated value
//! goes through `escape`.

use std::fmt::Write;

use crate::{
    auth::Viewer,
    models::{DryRun, Repository, Revision, Transplant},
    session::Flash,
};

/// Id of the sanitized commit message form. Tests and scripts look for it.
pub const ALT_COMMIT_MESSAGE_FORM_ID: &str = "altCommitMessageForm";

/// Escapes text for use in HTML content and double-quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Layout
///
/// Data every page needs for its header.
#[derive(Debug, Clone)]
pub struct Layout {
    pub title: String,
    pub viewer: Viewer,
    /// Where sign-in should return to.
    pub current_path: String,
    pub flashes: Vec<Flash>,
}

/// StackPage
///
/// View model of the stack page.
#[derive(Debug, Clone)]
pub struct StackPage {
    pub layout: Layout,
    pub revision_id: String,
    pub revision_phid: String,
    /// Display order, children first.
    pub rows: Vec<Revision>,
    pub landable: Vec<String>,
    /// Tip-first series that would land, for authenticated viewers.
    pub series: Option<Vec<Revision>>,
    pub dryrun: Option<DryRun>,
    pub target_repo: Option<Repository>,
    pub transplants: Vec<Transplant>,
    pub use_sec_approval_workflow: bool,
    pub csrf_token: Option<String>,
    pub landing_path_json: Option<String>,
    pub errors: Vec<String>,
}

fn render_layout(layout: &Layout, body: &str) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{} - Lando</title>\n</head>\n<body>\n",
        escape(&layout.title)
    );

    html.push_str("<nav class=\"Navbar\">\n<a class=\"Navbar-home\" href=\"/\">Lando</a>\n");
    match layout.viewer.user() {
        Some(user) => {
            let _ = write!(
                html,
                "<span class=\"Navbar-user\">{}</span>\n<a class=\"Navbar-signout\" href=\"/signout\">Logout</a>\n",
                escape(user.userinfo.display_name())
            );
        }
        None => {
            let next = crate::oidc::local_path_with_query(
                "/signin",
                &[("next", layout.current_path.as_str())],
            );
            let _ = write!(
                html,
                "<a class=\"Navbar-signin\" href=\"{}\">Login</a>\n",
                escape(&next)
            );
        }
    }
    html.push_str("</nav>\n");

    for flash in &layout.flashes {
        let _ = write!(
            html,
            "<div class=\"Flash Flash-{}\">{}</div>\n",
            flash.category.as_str(),
            escape(&flash.message)
        );
    }

    html.push_str("<main>\n");
    html.push_str(body);
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

fn hidden_input(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
        escape(name),
        escape(value)
    )
}

fn render_revision_row(html: &mut String, revision: &Revision, page: &StackPage) {
    let current = if revision.phid == page.revision_phid {
        " StackPage-revision-current"
    } else {
        ""
    };
    let landable = if page.landable.contains(&revision.phid) {
        "landable"
    } else {
        "not landable"
    };
    let author = revision
        .diff
        .author
        .as_ref()
        .map(|a| a.display_name())
        .unwrap_or("");

    let _ = write!(
        html,
        "<tr class=\"StackPage-revision{}\" data-phid=\"{}\">\n<td><a href=\"/{}/\">{}</a></td>\n<td>{}</td>\n<td>{}</td>\n<td>Diff {}</td>\n<td>{}</td>\n<td>{}</td>\n</tr>\n",
        current,
        escape(&revision.phid),
        escape(&revision.id),
        escape(&revision.id),
        escape(revision.title.as_deref().unwrap_or("")),
        escape(&revision.status.display),
        revision.diff.id,
        escape(author),
        landable,
    );
}

fn render_landing_preview(html: &mut String, page: &StackPage, series: &[Revision]) {
    html.push_str("<section class=\"StackPage-landingPreview\">\n<h2>Landing preview</h2>\n");

    if let Some(repo) = &page.target_repo {
        let _ = write!(
            html,
            "<p class=\"StackPage-landingPreview-target\">Landing to <a href=\"{}\">{}</a></p>\n",
            escape(&repo.url),
            escape(&repo.short_name)
        );
    }

    html.push_str("<ol>\n");
    for revision in series {
        let message = revision
            .commit_message
            .clone()
            .or_else(|| revision.title.clone())
            .unwrap_or_default();
        let _ = write!(
            html,
            "<li>{} <pre class=\"StackPage-landingPreview-commitMessage\">{}</pre></li>\n",
            escape(&revision.id),
            escape(&message)
        );
    }
    html.push_str("</ol>\n");

    if let Some(dryrun) = &page.dryrun {
        if let Some(blocker) = &dryrun.blocker {
            let _ = write!(
                html,
                "<p class=\"StackPage-landingPreview-blocker\">{}</p>\n",
                escape(blocker)
            );
        }
        for warning in &dryrun.warnings {
            let _ = write!(
                html,
                "<p class=\"StackPage-landingPreview-warning\">{}</p>\n",
                escape(&warning.display)
            );
        }
    }

    let blocked = page
        .dryrun
        .as_ref()
        .is_some_and(|dryrun| dryrun.blocker.is_some());
    if let (Some(path), Some(csrf), false) =
        (&page.landing_path_json, &page.csrf_token, blocked)
    {
        let confirmation = page
            .dryrun
            .as_ref()
            .and_then(|d| d.confirmation_token.as_deref())
            .unwrap_or("");
        let _ = write!(
            html,
            "<form id=\"landingForm\" method=\"post\" action=\"/{}/transplants\">\n",
            escape(&page.revision_id)
        );
        html.push_str(&hidden_input("csrf_token", csrf));
        html.push_str(&hidden_input("landing_path", path));
        html.push_str(&hidden_input("confirmation_token", confirmation));
        html.push_str("<button type=\"submit\">Land</button>\n</form>\n");
    }

    html.push_str("</section>\n");
}

fn render_sec_approval_form(html: &mut String, page: &StackPage) {
    let _ = write!(
        html,
        "<section class=\"StackPage-secApproval\">\n<h2>Sanitized commit message</h2>\n<p>This revision is secure. Provide a commit message that does not disclose the vulnerability.</p>\n<form id=\"{}\" method=\"post\" action=\"/{}/commit-message\">\n",
        ALT_COMMIT_MESSAGE_FORM_ID,
        escape(&page.revision_id)
    );
    if let Some(csrf) = &page.csrf_token {
        html.push_str(&hidden_input("csrf_token", csrf));
    }
    html.push_str(&hidden_input("phid", &page.revision_phid));
    html.push_str(
        "<textarea name=\"alt_commit_message\" rows=\"8\"></textarea>\n<button type=\"submit\">Submit</button>\n</form>\n</section>\n",
    );
}

fn render_transplants(html: &mut String, transplants: &[Transplant]) {
    html.push_str("<section class=\"StackPage-transplants\">\n<h2>Landing history</h2>\n");
    if transplants.is_empty() {
        html.push_str("<p>This stack has not been landed.</p>\n");
    } else {
        html.push_str("<ul>\n");
        for transplant in transplants {
            let _ = write!(
                html,
                "<li>Transplant #{}: {} by {} to {}{}</li>\n",
                transplant.id,
                escape(&transplant.status),
                escape(&transplant.requester_email),
                escape(&transplant.tree),
                transplant
                    .details
                    .as_deref()
                    .map(|d| format!(" ({})", escape(d)))
                    .unwrap_or_default()
            );
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</section>\n");
}

/// Renders the stack page.
pub fn stack_page(page: &StackPage) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>Stack for {}</h1>\n",
        escape(&page.revision_id)
    );

    if !page.errors.is_empty() {
        body.push_str("<ul class=\"StackPage-errors\">\n");
        for error in &page.errors {
            let _ = write!(body, "<li>{}</li>\n", escape(error));
        }
        body.push_str("</ul>\n");
    }

    body.push_str("<table class=\"StackPage-stack\">\n<tbody>\n");
    for revision in &page.rows {
        render_revision_row(&mut body, revision, page);
    }
    body.push_str("</tbody>\n</table>\n");

    if page.use_sec_approval_workflow {
        render_sec_approval_form(&mut body, page);
    }

    if let Some(series) = &page.series {
        render_landing_preview(&mut body, page, series);
    } else if !page.layout.viewer.is_authenticated() {
        body.push_str("<p class=\"StackPage-loginPrompt\">Log in to request a landing.</p>\n");
    }

    render_transplants(&mut body, &page.transplants);

    render_layout(&page.layout, &body)
}

/// Renders the home page.
pub fn home_page(layout: &Layout) -> String {
    let body = match layout.viewer.user() {
        Some(user) => format!(
            "<h1>Lando</h1>\n<p>Welcome, {}. Open a revision at <code>/D&lt;number&gt;/</code> to land it.</p>\n",
            escape(user.userinfo.display_name())
        ),
        None => "<h1>Lando</h1>\n<p>Log in to land revisions.</p>\n".to_string(),
    };
    render_layout(layout, &body)
}

/// Renders an error page.
pub fn error_page(layout: &Layout, heading: &str, message: &str) -> String {
    let body = format!(
        "<h1 class=\"ErrorPage-title\">{}</h1>\n<p class=\"ErrorPage-message\">{}</p>\n",
        escape(heading),
        escape(message)
    );
    render_layout(layout, &body)
}
