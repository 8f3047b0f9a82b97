use super::callback::CallbackContext;
use crate::error::AuthError;
use crate::storage::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Credentials recovered from a successful callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Whatever the active store can show for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMaterial {
    Tokens(CredentialBundle),
    /// Cookie deployments only ever expose the readable display-name cookie
    DisplayName(String),
}

impl SessionMaterial {
    pub fn display_name(&self) -> Option<&str> {
        match self {
            SessionMaterial::Tokens(bundle) => bundle.display_name.as_deref(),
            SessionMaterial::DisplayName(name) => Some(name),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            SessionMaterial::Tokens(bundle) => Some(&bundle.access_token),
            SessionMaterial::DisplayName(_) => None,
        }
    }
}

/// Body returned by the backend token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TokenResponse {
    pub fn into_bundle(self) -> Option<CredentialBundle> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        Some(CredentialBundle {
            access_token,
            id_token: self.id_token,
            display_name: self.username,
        })
    }
}

pub trait CredentialStore {
    /// Overwrites whatever was stored before.
    fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError>;
    fn read(&self) -> Option<SessionMaterial>;
    /// Drops every piece of session material this side can reach.
    fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Tokens(CredentialBundle),
    /// The backend holds the tokens; all we know is who signed in, maybe
    CookieSession { display_name: Option<String> },
}

#[async_trait]
pub trait TokenRecoveryStrategy {
    async fn recover(&self, ctx: &mut CallbackContext) -> Result<RecoveryOutcome, AuthError>;
}
