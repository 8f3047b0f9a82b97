use crate::clock::Clock;
use crate::error::StateError;
use crate::storage::{KeyValueStore, StorageError};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// sessionStorage key the pending state lives under
pub const STATE_KEY: &str = "oidc_state";

/// How long an issued state stays acceptable (10 minutes)
pub const STATE_VALIDITY_MS: i64 = 600_000;

const STATE_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

/// Issues the anti-CSRF state value and checks it exactly once on return.
#[derive(Clone)]
pub struct StateGuard {
    store: Arc<dyn KeyValueStore + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl StateGuard {
    pub fn new(
        store: Arc<dyn KeyValueStore + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self { store, clock }
    }

    /// Generate a fresh state and persist it, replacing any earlier one.
    pub fn issue(&self) -> Result<StateRecord, StorageError> {
        let bytes: [u8; STATE_BYTES] = rand::rng().random();
        let record = StateRecord {
            value: URL_SAFE_NO_PAD.encode(bytes),
            issued_at: self.clock.now(),
        };

        // serializing two strings cannot fail
        let raw = serde_json::to_string(&record).unwrap_or_default();
        self.store.set(STATE_KEY, &raw)?;

        tracing::debug!(state = %fingerprint(&record.value), "issued authorization state");
        Ok(record)
    }

    /// Check `returned` against the pending state.
    ///
    /// The pending record is removed before any comparison, so it is gone
    /// after this call whatever the outcome. A second call always sees
    /// `Missing`.
    pub fn validate(&self, returned: Option<&str>) -> Result<(), StateError> {
        let stored = match self.store.take(STATE_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("failed to take pending state: {}", e);
                // a failed take may have left the record behind
                if let Err(e) = self.store.remove(STATE_KEY) {
                    tracing::error!("pending state could not be deleted: {}", e);
                }
                None
            }
        };

        let Some(returned) = returned.filter(|r| !r.is_empty()) else {
            return Err(StateError::Missing);
        };

        let Some(record) = stored.and_then(|raw| match serde_json::from_str::<StateRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("discarding unreadable pending state: {}", e);
                None
            }
        }) else {
            return Err(StateError::Missing);
        };

        let matches: bool = returned
            .as_bytes()
            .ct_eq(record.value.as_bytes())
            .into();
        if !matches {
            return Err(StateError::Mismatch);
        }

        let age = self.clock.now() - record.issued_at;
        if age > Duration::milliseconds(STATE_VALIDITY_MS) {
            return Err(StateError::Expired);
        }

        tracing::debug!(state = %fingerprint(returned), "authorization state accepted");
        Ok(())
    }

    /// Throw away the pending state without checking it.
    pub fn discard(&self) -> Result<(), StorageError> {
        self.store.remove(STATE_KEY)
    }

    /// The pending state value, if any, without consuming it.
    pub fn pending(&self) -> Option<String> {
        self.store
            .get(STATE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<StateRecord>(&raw).ok())
            .map(|record| record.value)
    }
}

/// Short, non-reversible tag for logging secrets.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..6])
}
