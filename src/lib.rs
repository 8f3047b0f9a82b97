//! OpenID Connect authorization code client for a backend-mediated login.
//!
//! The tab's storage is injected ([`auth::TabStorage`]), the state round-trip is
//! checked exactly once ([`auth::StateGuard`]), and the callback is turned into
//! a session by one of three [`auth::TokenRecoveryStrategy`] implementations
//! picked by [`config::RecoveryMode`].

pub mod auth;
pub mod backend;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod error;
pub mod storage;

pub use auth::{CallbackContext, CallbackOutcome, OidcClient, TabStorage};
pub use config::{ClientConfig, RecoveryMode};
pub use error::{AuthError, StateError};
