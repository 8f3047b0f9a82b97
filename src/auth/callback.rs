use crate::error::AuthError;
use std::collections::HashMap;
use url::Url;

/// The URL the provider (or backend) sent the tab back to, split into the
/// pieces the recovery strategies look at.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    location: Url,
    query: HashMap<String, String>,
    fragment: HashMap<String, String>,
}

impl CallbackContext {
    pub fn new(location: Url) -> Self {
        let query = location.query_pairs().into_owned().collect();
        let fragment = location
            .fragment()
            .and_then(|f| serde_urlencoded::from_str::<Vec<(String, String)>>(f).ok())
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();

        Self {
            location,
            query,
            fragment,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Url::parse(raw).map(Self::new)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        non_empty(self.query.get(key))
    }

    pub fn fragment(&self, key: &str) -> Option<&str> {
        non_empty(self.fragment.get(key))
    }

    pub fn has_fragment(&self) -> bool {
        !self.fragment.is_empty()
    }

    /// Where the tab should show now. Tokens never stay in here once a
    /// fragment has been consumed.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Drop the fragment from the visible location, like `history.replaceState`.
    pub fn strip_fragment(&mut self) {
        self.location.set_fragment(None);
        self.fragment.clear();
    }

    /// `?error=...` from the provider, if it refused the request.
    pub fn provider_error(&self) -> Option<AuthError> {
        self.query("error").map(|code| AuthError::ProviderError {
            code: code.to_string(),
            description: self.query("error_description").map(str::to_string),
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}
