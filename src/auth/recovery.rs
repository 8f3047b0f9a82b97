use super::callback::CallbackContext;
use super::state_guard::StateGuard;
use super::traits::{CredentialBundle, CredentialStore, RecoveryOutcome, TokenRecoveryStrategy};
use crate::backend::BackendClient;
use crate::error::AuthError;
use async_trait::async_trait;
use std::sync::Arc;

/// Public client: the tab posts `?code=` to the backend and keeps the tokens.
pub struct CodeExchangeStrategy {
    guard: StateGuard,
    backend: BackendClient,
    store: Arc<dyn CredentialStore + Send + Sync>,
}

impl CodeExchangeStrategy {
    pub fn new(
        guard: StateGuard,
        backend: BackendClient,
        store: Arc<dyn CredentialStore + Send + Sync>,
    ) -> Self {
        Self {
            guard,
            backend,
            store,
        }
    }
}

#[async_trait]
impl TokenRecoveryStrategy for CodeExchangeStrategy {
    async fn recover(&self, ctx: &mut CallbackContext) -> Result<RecoveryOutcome, AuthError> {
        if let Some(err) = ctx.provider_error() {
            self.guard.discard()?;
            return Err(err);
        }

        let state = ctx.query("state");
        self.guard.validate(state)?;
        let state = state.unwrap_or_default();

        let code = ctx.query("code").ok_or(AuthError::NoAuthorizationCode)?;

        let bundle = self
            .backend
            .exchange_code(code, state)
            .await?
            .into_bundle()
            .ok_or_else(|| {
                AuthError::TokenExchangeFailed("response carried no access_token".to_string())
            })?;

        self.store.save(&bundle)?;
        tracing::info!("Recovered tokens via code exchange");
        Ok(RecoveryOutcome::Tokens(bundle))
    }
}

/// Confidential backend that already did the exchange and put the tokens in
/// `#access_token=...`. The code is spent, so the state check here is the only
/// thing binding these tokens to our request.
pub struct FragmentStrategy {
    guard: StateGuard,
    store: Arc<dyn CredentialStore + Send + Sync>,
}

impl FragmentStrategy {
    pub fn new(guard: StateGuard, store: Arc<dyn CredentialStore + Send + Sync>) -> Self {
        Self { guard, store }
    }
}

#[async_trait]
impl TokenRecoveryStrategy for FragmentStrategy {
    async fn recover(&self, ctx: &mut CallbackContext) -> Result<RecoveryOutcome, AuthError> {
        if let Err(e) = self.guard.validate(ctx.fragment("state")) {
            ctx.strip_fragment();
            return Err(e.into());
        }

        let bundle = ctx.fragment("access_token").map(|access_token| CredentialBundle {
            access_token: access_token.to_string(),
            id_token: ctx.fragment("id_token").map(str::to_string),
            display_name: ctx.fragment("username").map(str::to_string),
        });

        // tokens must not linger in the address bar either way
        ctx.strip_fragment();

        let bundle = bundle.ok_or(AuthError::NoTokenInFragment)?;
        self.store.save(&bundle)?;
        tracing::info!("Recovered tokens from callback fragment");
        Ok(RecoveryOutcome::Tokens(bundle))
    }
}

/// Confidential backend that keeps the tokens to itself behind an HttpOnly
/// cookie. A valid state plus the readable indicator cookie the backend sets
/// next to it is all the proof there is on this side.
pub struct CookieSessionStrategy {
    guard: StateGuard,
    store: Arc<dyn CredentialStore + Send + Sync>,
}

impl CookieSessionStrategy {
    pub fn new(guard: StateGuard, store: Arc<dyn CredentialStore + Send + Sync>) -> Self {
        Self { guard, store }
    }
}

#[async_trait]
impl TokenRecoveryStrategy for CookieSessionStrategy {
    async fn recover(&self, ctx: &mut CallbackContext) -> Result<RecoveryOutcome, AuthError> {
        if let Some(err) = ctx.provider_error() {
            self.guard.discard()?;
            return Err(err);
        }

        self.guard.validate(ctx.query("state"))?;

        // without the readable cookie the pages could never see this session
        let material = self.store.read().ok_or(AuthError::NoSessionCookie)?;
        let display_name = material.display_name().map(str::to_string);

        tracing::info!("Cookie session established by backend");
        Ok(RecoveryOutcome::CookieSession { display_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{CookieCredentialStore, LocalCredentialStore};
    use crate::auth::traits::SessionMaterial;
    use crate::backend::CredentialAttachment;
    use crate::clock::SystemClock;
    use crate::cookies::CookieJar;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn guard() -> StateGuard {
        StateGuard::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    fn local_store() -> Arc<LocalCredentialStore> {
        Arc::new(LocalCredentialStore::new(Arc::new(MemoryStore::new())))
    }

    fn callback(raw: &str) -> CallbackContext {
        CallbackContext::parse(raw).unwrap()
    }

    fn code_exchange(
        server: &MockServer,
    ) -> (CodeExchangeStrategy, StateGuard, Arc<LocalCredentialStore>) {
        let guard = guard();
        let store = local_store();
        let backend = BackendClient::new(
            &format!("{}/api", server.uri()),
            CredentialAttachment::Bearer(store.clone()),
            Arc::new(CookieJar::new()),
        )
        .unwrap();
        let strategy = CodeExchangeStrategy::new(guard.clone(), backend, store.clone());
        (strategy, guard, store)
    }

    #[tokio::test]
    async fn test_code_exchange_stores_tokens() {
        let server = MockServer::start().await;
        let (strategy, guard, store) = code_exchange(&server);
        let state = guard.issue().unwrap().value;

        Mock::given(method("POST"))
            .and(path("/api/auth/token"))
            .and(body_json(json!({"code": "C1", "state": &state})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "T1", "username": "alice"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback?code=C1&state={}",
            state
        ));
        let outcome = strategy.recover(&mut ctx).await.unwrap();

        let expected = CredentialBundle {
            access_token: "T1".to_string(),
            id_token: None,
            display_name: Some("alice".to_string()),
        };
        assert_eq!(outcome, RecoveryOutcome::Tokens(expected.clone()));
        assert_eq!(store.read(), Some(SessionMaterial::Tokens(expected)));
    }

    #[tokio::test]
    async fn test_code_exchange_500_stores_nothing() {
        let server = MockServer::start().await;
        let (strategy, guard, store) = code_exchange(&server);
        let state = guard.issue().unwrap().value;

        Mock::given(method("POST"))
            .and(path("/api/auth/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback?code=C1&state={}",
            state
        ));
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchangeFailed(_)));
        assert_eq!(store.read(), None);
    }

    #[tokio::test]
    async fn test_code_exchange_without_access_token_fails() {
        let server = MockServer::start().await;
        let (strategy, guard, store) = code_exchange(&server);
        let state = guard.issue().unwrap().value;

        Mock::given(method("POST"))
            .and(path("/api/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "alice"})))
            .mount(&server)
            .await;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback?code=C1&state={}",
            state
        ));
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchangeFailed(_)));
        assert_eq!(store.read(), None);
    }

    #[tokio::test]
    async fn test_code_exchange_missing_code() {
        let server = MockServer::start().await;
        let (strategy, guard, _) = code_exchange(&server);
        let state = guard.issue().unwrap().value;

        let mut ctx = callback(&format!("http://localhost:5173/callback?state={}", state));
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::NoAuthorizationCode));
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_code_exchange_forged_state_never_reaches_backend() {
        let server = MockServer::start().await;
        let (strategy, guard, store) = code_exchange(&server);
        guard.issue().unwrap();

        let mut ctx = callback("http://localhost:5173/callback?code=C1&state=forged");
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
        assert_eq!(store.read(), None);
    }

    #[tokio::test]
    async fn test_code_exchange_provider_error_discards_state() {
        let server = MockServer::start().await;
        let (strategy, guard, _) = code_exchange(&server);
        let state = guard.issue().unwrap().value;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback?error=access_denied&state={}",
            state
        ));
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderError { .. }));
        assert_eq!(guard.pending(), None);
    }

    #[tokio::test]
    async fn test_fragment_stores_tokens_and_strips_location() {
        let guard = guard();
        let store = local_store();
        let strategy = FragmentStrategy::new(guard.clone(), store.clone());
        let state = guard.issue().unwrap().value;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback#access_token=T2&id_token=ID2&username=bob&state={}",
            state
        ));
        let outcome = strategy.recover(&mut ctx).await.unwrap();

        let expected = CredentialBundle {
            access_token: "T2".to_string(),
            id_token: Some("ID2".to_string()),
            display_name: Some("bob".to_string()),
        };
        assert_eq!(outcome, RecoveryOutcome::Tokens(expected.clone()));
        assert_eq!(store.read(), Some(SessionMaterial::Tokens(expected)));
        assert_eq!(ctx.location().as_str(), "http://localhost:5173/callback");
    }

    #[tokio::test]
    async fn test_fragment_with_unissued_state_is_rejected() {
        let guard = guard();
        let store = local_store();
        let strategy = FragmentStrategy::new(guard, store.clone());

        let mut ctx =
            callback("http://localhost:5173/callback#access_token=T2&state=S1&username=bob");
        let err = strategy.recover(&mut ctx).await.unwrap_err();

        assert!(err.is_state_failure());
        assert_eq!(store.read(), None);
        assert_eq!(ctx.location().fragment(), None);
    }

    #[tokio::test]
    async fn test_fragment_without_token() {
        let guard = guard();
        let store = local_store();
        let strategy = FragmentStrategy::new(guard.clone(), store.clone());
        let state = guard.issue().unwrap().value;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback#username=bob&state={}",
            state
        ));
        let err = strategy.recover(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuthError::NoTokenInFragment));
        assert_eq!(store.read(), None);
    }

    fn cookie_fixture() -> (CookieSessionStrategy, StateGuard, Arc<CookieJar>, Url) {
        let guard = guard();
        let origin = Url::parse("http://localhost:8082/api").unwrap();
        let jar = Arc::new(CookieJar::new());
        let store = Arc::new(CookieCredentialStore::new(jar.clone(), origin.clone()));
        (
            CookieSessionStrategy::new(guard.clone(), store),
            guard,
            jar,
            origin,
        )
    }

    #[tokio::test]
    async fn test_cookie_session_reports_display_name() {
        let (strategy, guard, jar, origin) = cookie_fixture();
        let state = guard.issue().unwrap().value;
        jar.add_cookie_str("session=opaque; HttpOnly", &origin);
        jar.add_cookie_str("username=carol", &origin);

        let mut ctx = callback(&format!("http://localhost:5173/callback?state={}", state));
        let outcome = strategy.recover(&mut ctx).await.unwrap();
        assert_eq!(
            outcome,
            RecoveryOutcome::CookieSession {
                display_name: Some("carol".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_cookie_session_without_readable_cookie_fails() {
        let (strategy, guard, jar, origin) = cookie_fixture();
        let state = guard.issue().unwrap().value;
        jar.add_cookie_str("session=opaque; HttpOnly", &origin);

        let mut ctx = callback(&format!("http://localhost:5173/callback?state={}", state));
        let err = strategy.recover(&mut ctx).await.unwrap_err();

        assert!(matches!(err, AuthError::NoSessionCookie));
        assert!(!err.is_state_failure());
        assert_eq!(strategy.store.read(), None);
        // the state was still spent
        assert_eq!(guard.pending(), None);
    }

    #[tokio::test]
    async fn test_cookie_session_provider_error_skips_state() {
        let (strategy, guard, _, _) = cookie_fixture();
        let state = guard.issue().unwrap().value;

        let mut ctx = callback(&format!(
            "http://localhost:5173/callback?error=login_required&state={}",
            state
        ));
        match strategy.recover(&mut ctx).await {
            Err(AuthError::ProviderError { code, .. }) => assert_eq!(code, "login_required"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cookie_session_replayed_callback_fails() {
        let (strategy, guard, jar, origin) = cookie_fixture();
        let state = guard.issue().unwrap().value;
        jar.add_cookie_str("username=carol", &origin);
        let raw = format!("http://localhost:5173/callback?state={}", state);

        assert!(strategy.recover(&mut callback(&raw)).await.is_ok());
        // same callback firing twice
        let err = strategy.recover(&mut callback(&raw)).await.unwrap_err();
        assert!(matches!(err, AuthError::StateMissing));
    }
}
