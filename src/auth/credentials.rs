use super::traits::{CredentialBundle, CredentialStore, SessionMaterial};
use crate::cookies::CookieJar;
use crate::storage::{KeyValueStore, StorageError};
use std::sync::Arc;
use url::Url;

const ACCESS_TOKEN_KEY: &str = "access_token";
const ID_TOKEN_KEY: &str = "id_token";
const USERNAME_KEY: &str = "username";

/// Readable cookie the backend sets alongside its HttpOnly session cookie
pub const DISPLAY_NAME_COOKIE: &str = "username";

/// Tokens kept in the tab's durable storage (localStorage).
#[derive(Clone)]
pub struct LocalCredentialStore {
    store: Arc<dyn KeyValueStore + Send + Sync>,
}

impl LocalCredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore + Send + Sync>) -> Self {
        Self { store }
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("failed to read {} from credential store: {}", key, e);
                None
            }
        }
    }
}

impl CredentialStore for LocalCredentialStore {
    fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError> {
        self.store.set(ACCESS_TOKEN_KEY, &bundle.access_token)?;

        // optional fields overwrite too, otherwise a previous login's name leaks through
        match &bundle.id_token {
            Some(id_token) => self.store.set(ID_TOKEN_KEY, id_token)?,
            None => self.store.remove(ID_TOKEN_KEY)?,
        }
        match &bundle.display_name {
            Some(name) => self.store.set(USERNAME_KEY, name)?,
            None => self.store.remove(USERNAME_KEY)?,
        }

        Ok(())
    }

    fn read(&self) -> Option<SessionMaterial> {
        let access_token = self.read_key(ACCESS_TOKEN_KEY)?;
        Some(SessionMaterial::Tokens(CredentialBundle {
            access_token,
            id_token: self.read_key(ID_TOKEN_KEY),
            display_name: self.read_key(USERNAME_KEY),
        }))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(ID_TOKEN_KEY)?;
        self.store.remove(USERNAME_KEY)
    }
}

/// Session held by the backend in an HttpOnly cookie.
///
/// Only the display-name cookie is visible from here, so that's the whole
/// signal. Clearing it is a local courtesy; the real session ends when the
/// backend logout call expires the HttpOnly cookie.
#[derive(Clone)]
pub struct CookieCredentialStore {
    jar: Arc<CookieJar>,
    origin: Url,
}

impl CookieCredentialStore {
    pub fn new(jar: Arc<CookieJar>, origin: Url) -> Self {
        Self { jar, origin }
    }
}

impl CredentialStore for CookieCredentialStore {
    fn save(&self, _bundle: &CredentialBundle) -> Result<(), StorageError> {
        tracing::debug!("cookie session keeps no tokens client-side, ignoring save");
        Ok(())
    }

    fn read(&self) -> Option<SessionMaterial> {
        let raw = self.jar.readable(&self.origin, DISPLAY_NAME_COOKIE)?;
        let name = urlencoding::decode(&raw)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(raw);

        if name.is_empty() {
            None
        } else {
            Some(SessionMaterial::DisplayName(name))
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.jar.expire_readable(&self.origin, DISPLAY_NAME_COOKIE);
        Ok(())
    }
}
