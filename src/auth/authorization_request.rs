use super::state_guard::StateGuard;
use crate::error::AuthError;
use url::Url;

/// Builds the URL that sends the user to the provider's login page.
#[derive(Clone)]
pub struct AuthorizationRequestBuilder {
    endpoint: Url,
    client_id: String,
    redirect_uri: String,
    scope: String,
    guard: StateGuard,
}

impl AuthorizationRequestBuilder {
    pub fn new(
        endpoint: Url,
        client_id: String,
        redirect_uri: String,
        scopes: &[String],
        guard: StateGuard,
    ) -> Self {
        Self {
            endpoint,
            client_id,
            redirect_uri,
            scope: scopes.join(" "),
            guard,
        }
    }

    /// Issue a fresh state and return the authorization URL carrying it.
    /// Navigating there is up to the caller.
    pub fn build(&self) -> Result<Url, AuthError> {
        let state = self.guard.issue()?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scope)
            .append_pair("state", &state.value);

        tracing::info!(
            "Built authorization request for client_id={}, redirect_uri={}",
            self.client_id,
            self.redirect_uri
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn builder() -> (AuthorizationRequestBuilder, StateGuard) {
        let guard = StateGuard::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        let builder = AuthorizationRequestBuilder::new(
            Url::parse("http://localhost:8080/oidc/authorize").unwrap(),
            "my-app".to_string(),
            "http://localhost:5173/callback".to_string(),
            &["openid".to_string(), "profile".to_string(), "email".to_string()],
            guard.clone(),
        );
        (builder, guard)
    }

    #[test]
    fn test_build_carries_fixed_parameters() {
        let (builder, _) = builder();
        let url = builder.build().unwrap();

        assert!(url.as_str().starts_with("http://localhost:8080/oidc/authorize?"));
        assert!(url.as_str().contains("scope=openid+profile+email"));

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "my-app");
        assert_eq!(params["redirect_uri"], "http://localhost:5173/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "openid profile email");
    }

    #[test]
    fn test_state_round_trips_into_guard() {
        let (builder, guard) = builder();
        let url = builder.build().unwrap();

        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(guard.validate(Some(&state)), Ok(()));
    }

    #[test]
    fn test_each_build_issues_new_state() {
        let (builder, guard) = builder();
        let first = builder.build().unwrap();
        let _second = builder.build().unwrap();

        let stale = first
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(guard.validate(Some(&stale)).is_err());
    }
}
