use super::state_guard::StateGuard;
use super::traits::CredentialStore;
use crate::backend::BackendClient;
use std::sync::Arc;
use url::Url;

/// What the pages ask: am I signed in, as whom, and sign me out.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<dyn CredentialStore + Send + Sync>,
    guard: StateGuard,
    /// Only set when the real session lives in a backend cookie
    backend_logout: Option<BackendClient>,
    entry_url: Url,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn CredentialStore + Send + Sync>,
        guard: StateGuard,
        entry_url: Url,
    ) -> Self {
        Self {
            store,
            guard,
            backend_logout: None,
            entry_url,
        }
    }

    pub fn with_backend_logout(mut self, backend: BackendClient) -> Self {
        self.backend_logout = Some(backend);
        self
    }

    /// Local check only, never touches the network.
    pub fn is_authenticated(&self) -> bool {
        self.store.read().is_some()
    }

    pub fn display_name(&self) -> Option<String> {
        self.store
            .read()
            .and_then(|m| m.display_name().map(str::to_string))
    }

    /// End the session and return where the tab should go next.
    ///
    /// A failing backend call never blocks the local cleanup.
    pub async fn logout(&self) -> Url {
        if let Some(backend) = &self.backend_logout {
            if let Err(e) = backend.logout().await {
                tracing::warn!("Backend logout failed, clearing local session anyway: {}", e);
            }
        }

        self.invalidate();
        if let Err(e) = self.guard.discard() {
            tracing::warn!("Failed to drop pending state on logout: {}", e);
        }

        tracing::info!("Logged out");
        self.entry_url.clone()
    }

    /// Forget local credentials after the backend stopped honouring them.
    pub fn invalidate(&self) {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credentials: {}", e);
        }
    }

    pub fn entry_url(&self) -> &Url {
        &self.entry_url
    }
}
