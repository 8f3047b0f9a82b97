//! Browser-style cookie jar shared between the HTTP client and the credential
//! store.
//!
//! Cookies are scoped by host only (ports are ignored, as browsers do). `Domain`
//! and `Path` attributes are not interpreted: one backend origin is all this
//! client ever talks to. HttpOnly cookies ride along on requests but are hidden
//! from [`CookieJar::readable`], which is the equivalent of `document.cookie`.
//! Secure cookies only go to https or loopback origins.

use crate::clock::{Clock, SystemClock};
use crate::storage::{KeyValueStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use cookie::Cookie;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use url::Url;

const COOKIES_KEY: &str = "cookies";

/// Browsers cap any cookie lifetime at 400 days.
const MAX_LIFETIME_DAYS: i64 = 400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredCookie {
    host: String,
    name: String,
    value: String,
    http_only: bool,
    #[serde(default)]
    secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn applies_to(&self, host: &str, secure_origin: bool, now: DateTime<Utc>) -> bool {
        self.host == host && (secure_origin || !self.secure) && !self.is_expired(now)
    }
}

pub struct CookieJar {
    cookies: Mutex<Vec<StoredCookie>>,
    backing: Option<Arc<dyn KeyValueStore + Send + Sync>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            cookies: Mutex::new(Vec::new()),
            backing: None,
            clock,
        }
    }

    /// Jar that loads from and writes through to `backing`.
    pub fn persistent(
        backing: Arc<dyn KeyValueStore + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self, StorageError> {
        let cookies = match backing.get(COOKIES_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("discarding unreadable cookie jar: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Ok(Self {
            cookies: Mutex::new(cookies),
            backing: Some(backing),
            clock,
        })
    }

    /// Apply one `Set-Cookie` header value as if `url` had sent it.
    pub fn add_cookie_str(&self, raw: &str, url: &Url) {
        let Some(host) = host_of(url) else {
            return;
        };
        let now = self.clock.now();
        let Some(cookie) = parse_set_cookie(raw, &host, now) else {
            tracing::debug!("ignoring malformed Set-Cookie from {}", host);
            return;
        };

        self.update(|cookies| {
            cookies.retain(|c| !(c.host == cookie.host && c.name == cookie.name));
            if !cookie.is_expired(now) {
                cookies.push(cookie);
            }
        });
    }

    /// Value of a script-readable cookie. HttpOnly cookies never show up here.
    pub fn readable(&self, url: &Url, name: &str) -> Option<String> {
        let host = host_of(url)?;
        let secure = is_secure_origin(url);
        let now = self.clock.now();
        let cookies = self.cookies.lock().ok()?;
        cookies
            .iter()
            .find(|c| c.name == name && !c.http_only && c.applies_to(&host, secure, now))
            .map(|c| c.value.clone())
    }

    /// Expire a script-readable cookie. Returns false when there was nothing
    /// the script could touch, including when the cookie is HttpOnly.
    pub fn expire_readable(&self, url: &Url, name: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        self.update(|cookies| {
            let before = cookies.len();
            cookies.retain(|c| !(c.host == host && c.name == name && !c.http_only));
            before != cookies.len()
        })
        .unwrap_or(false)
    }

    /// `Cookie` request header for `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = host_of(url)?;
        let secure = is_secure_origin(url);
        let now = self.clock.now();
        let cookies = self.cookies.lock().ok()?;
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| c.applies_to(&host, secure, now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<StoredCookie>) -> R) -> Option<R> {
        let mut cookies = match self.cookies.lock() {
            Ok(c) => c,
            Err(_) => {
                tracing::error!("cookie jar lock poisoned");
                return None;
            }
        };
        let out = f(&mut cookies);

        let now = self.clock.now();
        cookies.retain(|c| !c.is_expired(now));

        if let Some(backing) = &self.backing {
            match serde_json::to_string(&*cookies) {
                Ok(raw) => {
                    if let Err(e) = backing.set(COOKIES_KEY, &raw) {
                        tracing::warn!("failed to persist cookie jar: {}", e);
                    }
                }
                Err(e) => tracing::warn!("failed to serialize cookie jar: {}", e),
            }
        }

        Some(out)
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            match header.to_str() {
                Ok(raw) => self.add_cookie_str(raw, url),
                Err(_) => tracing::debug!("ignoring non-ASCII Set-Cookie header"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self.header_for(url)?;
        HeaderValue::from_str(&header).ok()
    }
}

fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}

fn is_secure_origin(url: &Url) -> bool {
    if url.scheme() == "https" {
        return true;
    }
    match url.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn parse_set_cookie(raw: &str, host: &str, now: DateTime<Utc>) -> Option<StoredCookie> {
    let cookie = Cookie::parse(raw).ok()?;
    let max_lifetime = Duration::days(MAX_LIFETIME_DAYS);
    let ceiling = now + max_lifetime;

    // Max-Age takes precedence over Expires
    let expires_at = match cookie.max_age() {
        Some(age) => {
            let secs = age.whole_seconds().clamp(0, max_lifetime.num_seconds());
            Some(now + Duration::seconds(secs))
        }
        None => cookie.expires_datetime().map(|at| {
            DateTime::from_timestamp(at.unix_timestamp(), 0).map_or(ceiling, |at| at.min(ceiling))
        }),
    };

    Some(StoredCookie {
        host: host.to_string(),
        name: cookie.name().to_string(),
        value: cookie.value().trim_matches('"').to_string(),
        http_only: cookie.http_only().unwrap_or(false),
        secure: cookie.secure().unwrap_or(false),
        expires_at,
    })
}
