use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use url::Url;

pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "http://localhost:8080/oidc/authorize";
pub const DEFAULT_CLIENT_ID: &str = "my-app";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5173/callback";
pub const DEFAULT_SCOPE: &str = "openid profile email";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8082/api";
pub const DEFAULT_APP_URL: &str = "http://localhost:5173/";
pub const DEFAULT_DASHBOARD_PATH: &str = "/dashboard";

/// How the callback is turned into a signed-in session. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecoveryMode {
    /// Browser posts the code to the backend and keeps the returned tokens
    CodeExchange,
    /// Backend exchanges the code and hands tokens back in the URL fragment
    Fragment,
    /// Backend exchanges the code and keeps tokens behind an HttpOnly cookie
    CookieSession,
}

impl RecoveryMode {
    pub fn holds_tokens(self) -> bool {
        !matches!(self, RecoveryMode::CookieSession)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub authorization_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Backend API root, e.g. `http://localhost:8082/api`
    pub backend_url: String,
    /// Unauthenticated entry point of the app
    pub app_url: String,
    pub dashboard_path: String,
    pub mode: RecoveryMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: parse_scopes(DEFAULT_SCOPE),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            dashboard_path: DEFAULT_DASHBOARD_PATH.to_string(),
            mode: RecoveryMode::CodeExchange,
        }
    }
}

impl ClientConfig {
    /// Fail early on URLs that would otherwise only blow up mid-flow.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.authorization_endpoint).context("invalid authorization endpoint")?;
        Url::parse(&self.redirect_uri).context("invalid redirect URI")?;
        Url::parse(&self.backend_url).context("invalid backend URL")?;
        Url::parse(&self.app_url).context("invalid app URL")?;

        if self.client_id.trim().is_empty() {
            return Err(anyhow!("client id cannot be empty"));
        }
        if self.scopes.is_empty() {
            return Err(anyhow!("at least one scope is required"));
        }
        if !self.scopes.iter().any(|s| s == "openid") {
            tracing::warn!("scope list has no 'openid', provider may not issue an id_token");
        }

        Ok(())
    }

    pub fn entry_url(&self) -> Result<Url> {
        Url::parse(&self.app_url).context("invalid app URL")
    }

    pub fn dashboard_url(&self) -> Result<Url> {
        self.entry_url()?
            .join(&self.dashboard_path)
            .context("invalid dashboard path")
    }
}

pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
