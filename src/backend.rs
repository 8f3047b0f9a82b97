use crate::auth::{CredentialStore, TokenResponse};
use crate::cookies::CookieJar;
use crate::error::AuthError;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// How requests prove who's asking.
#[derive(Clone)]
pub enum CredentialAttachment {
    /// `Authorization: Bearer` with the access token from the store
    Bearer(Arc<dyn CredentialStore + Send + Sync>),
    /// Whatever cookies the jar holds for the backend, HttpOnly ones included
    Cookies,
}

/// Result of a protected call. A 401 isn't an error, it means the session is gone.
#[derive(Debug)]
pub enum ResourceResponse<T> {
    Data(T),
    Unauthorized,
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    code: &'a str,
    state: &'a str,
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    attachment: CredentialAttachment,
}

impl BackendClient {
    pub fn new(
        base_url: &str,
        attachment: CredentialAttachment,
        jar: Arc<CookieJar>,
    ) -> Result<Self, AuthError> {
        let client = Client::builder().cookie_provider(jar).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            attachment,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn attach(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.attachment {
            CredentialAttachment::Bearer(store) => {
                match store.read().as_ref().and_then(|m| m.access_token()) {
                    Some(token) => req.bearer_auth(token),
                    None => req,
                }
            }
            // the jar is wired into the client, nothing to add per request
            CredentialAttachment::Cookies => req,
        }
    }

    fn has_credential(&self) -> bool {
        match &self.attachment {
            CredentialAttachment::Bearer(store) => store
                .read()
                .as_ref()
                .and_then(|m| m.access_token())
                .is_some(),
            CredentialAttachment::Cookies => true,
        }
    }

    /// POST the authorization code to the backend and get tokens back.
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenResponse, AuthError> {
        let url = self.url("/auth/token");

        let response = self
            .client
            .post(&url)
            .json(&TokenExchangeRequest { code, state })
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Token exchange failed: {} - {}", status, body);
            return Err(AuthError::TokenExchangeFailed(format!(
                "backend answered {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("failed to read body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| AuthError::TokenExchangeFailed(format!("malformed token response: {}", e)))
    }

    /// Current user as the backend sees it. Failures are logged, not returned.
    pub async fn user_info(&self) -> Option<serde_json::Value> {
        if !self.has_credential() {
            return None;
        }

        let req = self
            .client
            .get(self.url("/auth/user"))
            .header(header::ACCEPT, "application/json");

        let response = match self.attach(req).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Error getting user info: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::error!("Failed to get user info: {}", response.status());
            return None;
        }

        match response.json().await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::error!("Malformed user info: {}", e);
                None
            }
        }
    }

    /// Ask the backend to end the cookie session.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let req = self.client.post(self.url("/auth/logout"));
        let response = self.attach(req).send().await?;

        if !response.status().is_success() {
            return Err(AuthError::ResourceFailed(response.status()));
        }
        Ok(())
    }

    /// GET a protected JSON resource under the backend root.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ResourceResponse<T>, AuthError> {
        let req = self
            .client
            .get(self.url(path))
            .header(header::ACCEPT, "application/json");
        let response = self.attach(req).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                tracing::warn!("Unauthorized response from {}", path);
                Ok(ResourceResponse::Unauthorized)
            }
            status if !status.is_success() => Err(AuthError::ResourceFailed(status)),
            _ => Ok(ResourceResponse::Data(response.json().await?)),
        }
    }
}
