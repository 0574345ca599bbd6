use std::env;

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at startup and
/// immutable afterwards; handlers and extractors pull it out of `AppState` via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls cookie hardening and CSRF enforcement.
    pub env: Env,
    // Base URL of the Lando API service, without a trailing slash.
    pub lando_api_url: String,
    // Public URL of this site, used as the post-logout return address.
    pub site_url: String,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
    // HMAC secret used to sign the session cookie.
    pub session_secret: String,
    // Lifetime of the session cookie in seconds.
    pub session_lifetime_secs: i64,
    // How long after login a session still counts as authenticated.
    pub auth_freshness_secs: i64,
    // Feature toggle for the sanitized commit message workflow.
    pub enable_sec_approval: bool,
    // CSRF validation of form posts. Always true in production.
    pub csrf_enabled: bool,
    // OpenID Connect provider settings (Auth0).
    pub oidc: OidcConfig,
}

/// OidcConfig
///
/// Settings for the Auth0 tenant that issues identity and access tokens.
#[derive(Clone, Debug)]
pub struct OidcConfig {
    /// Issuer base URL, e.g. `https://auth.example.com`. No trailing slash.
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    /// API audience requested for the access token forwarded to Lando API.
    pub audience: String,
}

/// Env
///
/// Defines the runtime context, used to switch between development conveniences
/// and hardened production behaviour.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

const LOCAL_SESSION_SECRET: &str = "lando-ui-local-development-session-secret";
const DEFAULT_SESSION_LIFETIME_SECS: i64 = 14 * 24 * 60 * 60;
const DEFAULT_AUTH_FRESHNESS_SECS: i64 = 60 * 60;

impl Default for AppConfig {
    /// Non-panicking configuration for tests and local scaffolding.
    fn default() -> Self {
        Self {
            env: Env::Local,
            lando_api_url: "http://localhost:8888".to_string(),
            site_url: "http://localhost:7777".to_string(),
            bind_addr: "0.0.0.0:7777".to_string(),
            session_secret: LOCAL_SESSION_SECRET.to_string(),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            auth_freshness_secs: DEFAULT_AUTH_FRESHNESS_SECS,
            enable_sec_approval: false,
            csrf_enabled: true,
            oidc: OidcConfig {
                issuer: "http://localhost:9999".to_string(),
                client_id: "lando-ui-local".to_string(),
                client_secret: "lando-ui-local-client-secret".to_string(),
                audience: "lando-api".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables, fail-fast.
    ///
    /// # Panics
    /// Panics in `Env::Production` when a secret or an upstream URL is missing, so the
    /// process never starts half-configured.
    pub fn load() -> Self {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let defaults = Self::default();

        let session_lifetime_secs =
            int_var("SESSION_LIFETIME_SECONDS").unwrap_or(DEFAULT_SESSION_LIFETIME_SECS);
        let auth_freshness_secs =
            int_var("AUTH_FRESHNESS_SECONDS").unwrap_or(DEFAULT_AUTH_FRESHNESS_SECS);
        let enable_sec_approval = flag_var("ENABLE_SEC_APPROVAL").unwrap_or(false);
        let bind_addr = env::var("BIND_ADDR").unwrap_or(defaults.bind_addr);

        match env {
            Env::Local => Self {
                env: Env::Local,
                lando_api_url: trimmed(
                    env::var("LANDO_API_URL").unwrap_or(defaults.lando_api_url),
                ),
                site_url: trimmed(env::var("SITE_URL").unwrap_or(defaults.site_url)),
                bind_addr,
                session_secret: env::var("SESSION_SECRET").unwrap_or(defaults.session_secret),
                session_lifetime_secs,
                auth_freshness_secs,
                enable_sec_approval,
                csrf_enabled: flag_var("CSRF_ENABLED").unwrap_or(true),
                oidc: OidcConfig {
                    issuer: trimmed(env::var("OIDC_ISSUER").unwrap_or(defaults.oidc.issuer)),
                    client_id: env::var("OIDC_CLIENT_ID").unwrap_or(defaults.oidc.client_id),
                    client_secret: env::var("OIDC_CLIENT_SECRET")
                        .unwrap_or(defaults.oidc.client_secret),
                    audience: env::var("OIDC_AUDIENCE").unwrap_or(defaults.oidc.audience),
                },
            },
            Env::Production => {
                if flag_var("CSRF_ENABLED") == Some(false) {
                    tracing::warn!("CSRF_ENABLED=false is ignored in production");
                }

                Self {
                    env: Env::Production,
                    lando_api_url: trimmed(
                        env::var("LANDO_API_URL")
                            .expect("FATAL: LANDO_API_URL required in prod"),
                    ),
                    site_url: trimmed(
                        env::var("SITE_URL").expect("FATAL: SITE_URL required in prod"),
                    ),
                    bind_addr,
                    session_secret: env::var("SESSION_SECRET")
                        .expect("FATAL: SESSION_SECRET must be set in production."),
                    session_lifetime_secs,
                    auth_freshness_secs,
                    enable_sec_approval,
                    csrf_enabled: true,
                    oidc: OidcConfig {
                        issuer: trimmed(
                            env::var("OIDC_ISSUER").expect("FATAL: OIDC_ISSUER required in prod"),
                        ),
                        client_id: env::var("OIDC_CLIENT_ID")
                            .expect("FATAL: OIDC_CLIENT_ID required in prod"),
                        client_secret: env::var("OIDC_CLIENT_SECRET")
                            .expect("FATAL: OIDC_CLIENT_SECRET required in prod"),
                        audience: env::var("OIDC_AUDIENCE")
                            .unwrap_or(defaults.oidc.audience),
                    },
                }
            }
        }
    }

    /// Whether cookies must carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.env == Env::Production
    }
}

fn trimmed(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn int_var(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn flag_var(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
