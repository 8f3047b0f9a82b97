mod authorization_request;
mod callback;
mod credentials;
mod recovery;
mod session;
mod state_guard;
mod traits;

pub use authorization_request::AuthorizationRequestBuilder;
pub use callback::CallbackContext;
pub use credentials::{CookieCredentialStore, DISPLAY_NAME_COOKIE, LocalCredentialStore};
pub use recovery::{CodeExchangeStrategy, CookieSessionStrategy, FragmentStrategy};
pub use session::SessionController;
pub use state_guard::{STATE_KEY, STATE_VALIDITY_MS, StateGuard, StateRecord, fingerprint};
pub use traits::{
    CredentialBundle, CredentialStore, RecoveryOutcome, SessionMaterial, TokenRecoveryStrategy,
    TokenResponse,
};

use crate::backend::{BackendClient, CredentialAttachment, ResourceResponse};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, RecoveryMode};
use crate::cookies::CookieJar;
use crate::error::AuthError;
use crate::storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// The storage a browser tab gives a page.
#[derive(Clone)]
pub struct TabStorage {
    /// Per-tab and ephemeral (sessionStorage). Holds the pending state.
    pub session: Arc<dyn KeyValueStore + Send + Sync>,
    /// Durable (localStorage). Holds tokens for the token-keeping modes.
    pub local: Arc<dyn KeyValueStore + Send + Sync>,
    pub cookies: Arc<CookieJar>,
    pub clock: Arc<dyn Clock + Send + Sync>,
}

impl TabStorage {
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            session: Arc::new(MemoryStore::new()),
            local: Arc::new(MemoryStore::new()),
            cookies: Arc::new(CookieJar::with_clock(clock.clone())),
            clock,
        }
    }

    /// Everything under `dir`, so separate processes see one tab.
    pub fn on_disk(dir: &Path) -> Result<Self, StorageError> {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock);
        let cookie_file: Arc<dyn KeyValueStore + Send + Sync> =
            Arc::new(FileStore::new(dir.join("cookies.json")));

        Ok(Self {
            session: Arc::new(FileStore::new(dir.join("session.json"))),
            local: Arc::new(FileStore::new(dir.join("local.json"))),
            cookies: Arc::new(CookieJar::persistent(cookie_file, clock.clone())?),
            clock,
        })
    }
}

/// How a callback ended, ready for the page to act on.
#[derive(Debug)]
pub enum CallbackOutcome {
    SignedIn {
        redirect_to: Url,
        display_name: Option<String>,
    },
    Failed {
        message: String,
        retry_url: Url,
        error: AuthError,
    },
}

/// One configured client: a single recovery mode with the store and backend
/// wiring that goes with it.
#[derive(Clone)]
pub struct OidcClient {
    mode: RecoveryMode,
    authorization: AuthorizationRequestBuilder,
    strategy: Arc<dyn TokenRecoveryStrategy + Send + Sync>,
    session: SessionController,
    backend: BackendClient,
    dashboard_url: Url,
}

impl OidcClient {
    pub fn new(config: &ClientConfig, storage: TabStorage) -> Result<Self> {
        config.validate()?;

        let guard = StateGuard::new(storage.session.clone(), storage.clock.clone());
        let backend_origin = Url::parse(&config.backend_url).context("invalid backend URL")?;

        let (store, attachment): (Arc<dyn CredentialStore + Send + Sync>, CredentialAttachment) =
            match config.mode {
                RecoveryMode::CodeExchange | RecoveryMode::Fragment => {
                    let store: Arc<dyn CredentialStore + Send + Sync> =
                        Arc::new(LocalCredentialStore::new(storage.local.clone()));
                    (store.clone(), CredentialAttachment::Bearer(store))
                }
                RecoveryMode::CookieSession => {
                    let store: Arc<dyn CredentialStore + Send + Sync> = Arc::new(
                        CookieCredentialStore::new(storage.cookies.clone(), backend_origin),
                    );
                    (store, CredentialAttachment::Cookies)
                }
            };

        let backend = BackendClient::new(&config.backend_url, attachment, storage.cookies.clone())
            .context("failed to build backend client")?;

        let strategy: Arc<dyn TokenRecoveryStrategy + Send + Sync> = match config.mode {
            RecoveryMode::CodeExchange => Arc::new(CodeExchangeStrategy::new(
                guard.clone(),
                backend.clone(),
                store.clone(),
            )),
            RecoveryMode::Fragment => Arc::new(FragmentStrategy::new(guard.clone(), store.clone())),
            RecoveryMode::CookieSession => {
                Arc::new(CookieSessionStrategy::new(guard.clone(), store.clone()))
            }
        };

        let mut session = SessionController::new(store, guard.clone(), config.entry_url()?);
        if !config.mode.holds_tokens() {
            session = session.with_backend_logout(backend.clone());
        }

        let authorization = AuthorizationRequestBuilder::new(
            Url::parse(&config.authorization_endpoint)
                .context("invalid authorization endpoint")?,
            config.client_id.clone(),
            config.redirect_uri.clone(),
            &config.scopes,
            guard,
        );

        tracing::debug!("OIDC client ready in {:?} mode", config.mode);

        Ok(Self {
            mode: config.mode,
            authorization,
            strategy,
            session,
            backend,
            dashboard_url: config.dashboard_url()?,
        })
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Where to send the user to sign in. Issues a new state every call.
    pub fn authorization_url(&self) -> Result<Url, AuthError> {
        self.authorization.build()
    }

    /// Run the configured recovery strategy as is.
    pub async fn recover(&self, ctx: &mut CallbackContext) -> Result<RecoveryOutcome, AuthError> {
        self.strategy.recover(ctx).await
    }

    /// Callback page entry point. Every failure is turned into a message and a
    /// way back to the sign-in page; nothing escapes as an error.
    pub async fn handle_callback(&self, ctx: &mut CallbackContext) -> CallbackOutcome {
        match self.recover(ctx).await {
            Ok(outcome) => {
                let display_name = match outcome {
                    RecoveryOutcome::Tokens(bundle) => bundle.display_name,
                    RecoveryOutcome::CookieSession { display_name } => display_name,
                };
                tracing::info!(
                    "Sign-in complete for {}",
                    display_name.as_deref().unwrap_or("unnamed user")
                );
                CallbackOutcome::SignedIn {
                    redirect_to: self.dashboard_url.clone(),
                    display_name,
                }
            }
            Err(error) => {
                if error.is_security_event() {
                    tracing::warn!(
                        target: "security",
                        kind = ?error,
                        callback = %ctx.location().path(),
                        "Rejected authorization callback: {}",
                        error
                    );
                } else {
                    tracing::info!("Authorization callback failed: {}", error);
                }

                CallbackOutcome::Failed {
                    message: error.user_message(),
                    retry_url: self.session.entry_url().clone(),
                    error,
                }
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn display_name(&self) -> Option<String> {
        self.session.display_name()
    }

    pub async fn logout(&self) -> Url {
        self.session.logout().await
    }

    pub async fn user_info(&self) -> Option<serde_json::Value> {
        self.backend.user_info().await
    }

    /// GET a protected resource. `Ok(None)` means the backend rejected the
    /// session: local credentials are already gone and the tab should go back
    /// to [`SessionController::entry_url`].
    pub async fn fetch_protected<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, AuthError> {
        match self.backend.get_json(path).await? {
            ResourceResponse::Data(data) => Ok(Some(data)),
            ResourceResponse::Unauthorized => {
                tracing::warn!("Unauthorized, redirecting to login");
                self.session.invalidate();
                Ok(None)
            }
        }
    }

    pub async fn fetch_user_profile(&self) -> Result<Option<serde_json::Value>, AuthError> {
        self.fetch_protected("/resources/profile").await
    }

    pub async fn fetch_protected_data(&self) -> Result<Option<serde_json::Value>, AuthError> {
        self.fetch_protected("/resources/data").await
    }
}
