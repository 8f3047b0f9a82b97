use crate::storage::StorageError;
use reqwest::StatusCode;
use thiserror::Error;

/// Why a returned state value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no state was returned or none is pending")]
    Missing,
    #[error("returned state does not match the pending one")]
    Mismatch,
    #[error("pending state is older than the validity window")]
    Expired,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("state missing")]
    StateMissing,
    #[error("state mismatch, possible CSRF attack")]
    StateMismatch,
    #[error("state expired, possible replay")]
    StateExpired,
    #[error("identity provider reported {code}")]
    ProviderError {
        code: String,
        description: Option<String>,
    },
    #[error("callback carried no authorization code")]
    NoAuthorizationCode,
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("callback fragment carried no access token")]
    NoTokenInFragment,
    #[error("backend set no readable session cookie")]
    NoSessionCookie,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("resource request failed with status {0}")]
    ResourceFailed(StatusCode),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<StateError> for AuthError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Missing => AuthError::StateMissing,
            StateError::Mismatch => AuthError::StateMismatch,
            StateError::Expired => AuthError::StateExpired,
        }
    }
}

impl AuthError {
    /// Any of the three state rejections.
    pub fn is_state_failure(&self) -> bool {
        matches!(
            self,
            AuthError::StateMissing | AuthError::StateMismatch | AuthError::StateExpired
        )
    }

    /// Forgery or replay signals. These go to the `security` log target.
    pub fn is_security_event(&self) -> bool {
        matches!(self, AuthError::StateMismatch | AuthError::StateExpired)
    }

    /// Message safe to show the user. State failures share one message so the
    /// page doesn't tell an attacker which check tripped.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::StateMissing | AuthError::StateMismatch | AuthError::StateExpired => {
                "Your sign-in link is no longer valid. Please sign in again.".to_string()
            }
            // the callback URL can be crafted, so nothing from it is echoed
            AuthError::ProviderError { code, .. } => match code.as_str() {
                "access_denied" => "Sign-in was cancelled. Please sign in again.",
                "login_required" | "interaction_required" => {
                    "You need to sign in with your identity provider first."
                }
                "consent_required" => "Access was not granted. Please sign in again.",
                "temporarily_unavailable" | "server_error" => {
                    "The identity provider is unavailable. Please try again later."
                }
                _ => "Sign-in was refused by the identity provider. Please sign in again.",
            }
            .to_string(),
            AuthError::NoAuthorizationCode => {
                "No authorization code was received. Please sign in again.".to_string()
            }
            AuthError::TokenExchangeFailed(_)
            | AuthError::NoTokenInFragment
            | AuthError::NoSessionCookie => {
                "Could not complete sign-in. Please sign in again.".to_string()
            }
            AuthError::Network(_) => {
                "Could not reach the server. Please sign in again.".to_string()
            }
            AuthError::ResourceFailed(status) => format!("Request failed ({}).", status),
            AuthError::Storage(_) => {
                "Could not save your session. Please sign in again.".to_string()
            }
        }
    }
}
