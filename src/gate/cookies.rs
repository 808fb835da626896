//! Session cookies: the token pair (`HttpOnly`) and the persisted slot the
//! frontend reads.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error};

use crate::auth::{PersistedSession, SessionSlot, SessionTokens, STORAGE_KEY};

pub const ACCESS_TOKEN_COOKIE: &str = "maxirent_access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "maxirent_refresh_token";

/// Attributes shared by every cookie the gateway sets.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    /// Only mark cookies secure when the frontend is served over HTTPS.
    pub secure: bool,
    pub max_age_seconds: u64,
}

impl CookiePolicy {
    fn build(
        &self,
        name: &str,
        value: &str,
        http_only: bool,
        max_age: u64,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{name}={value}; Path=/; SameSite=Lax; Max-Age={max_age}");
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn set(&self, name: &str, value: &str, http_only: bool) -> Option<HeaderValue> {
        self.build(name, value, http_only, self.max_age_seconds)
            .map_err(|err| error!("Failed to build {name} cookie: {err}"))
            .ok()
    }

    fn clear(&self, name: &str, http_only: bool) -> Option<HeaderValue> {
        self.build(name, "", http_only, 0)
            .map_err(|err| error!("Failed to build {name} cookie: {err}"))
            .ok()
    }

    /// `Set-Cookie` values moving the client from `before` to `after`.
    #[must_use]
    pub fn token_updates(
        &self,
        before: Option<&SessionTokens>,
        after: Option<&SessionTokens>,
    ) -> Vec<HeaderValue> {
        match (before, after) {
            (before, Some(after)) if before != Some(after) => [
                self.set(ACCESS_TOKEN_COOKIE, &after.access_token, true),
                self.set(REFRESH_TOKEN_COOKIE, &after.refresh_token, true),
            ]
            .into_iter()
            .flatten()
            .collect(),
            (Some(_), None) => [
                self.clear(ACCESS_TOKEN_COOKIE, true),
                self.clear(REFRESH_TOKEN_COOKIE, true),
            ]
            .into_iter()
            .flatten()
            .collect(),
            _ => Vec::new(),
        }
    }
}

/// Value of cookie `name`, across every `Cookie` header.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

/// Token pair presented by the client. A lone refresh token is kept with an
/// already-expired access token so the next resolution renews it.
#[must_use]
pub fn presented_tokens(headers: &HeaderMap) -> Option<SessionTokens> {
    let refresh_token = read_cookie(headers, REFRESH_TOKEN_COOKIE)?;
    match read_cookie(headers, ACCESS_TOKEN_COOKIE) {
        Some(access_token) => Some(SessionTokens {
            access_token,
            refresh_token,
            expires_at: None,
        }),
        None => Some(SessionTokens {
            access_token: String::new(),
            refresh_token,
            expires_at: Some(0),
        }),
    }
}

/// Put `first` ahead of any `Set-Cookie` already on `headers`, so later
/// writers win when the client applies them in order.
pub fn prepend_set_cookies(headers: &mut HeaderMap, first: Vec<HeaderValue>) {
    if first.is_empty() {
        return;
    }
    let later: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
    headers.remove(SET_COOKIE);
    for value in first.into_iter().chain(later) {
        headers.append(SET_COOKIE, value);
    }
}

fn encode_slot(session: &PersistedSession) -> Option<String> {
    serde_json::to_vec(session)
        .map(|json| Base64UrlUnpadded::encode_string(&json))
        .map_err(|err| error!("Failed to encode session slot: {err}"))
        .ok()
}

fn decode_slot(value: &str) -> Option<PersistedSession> {
    let bytes = Base64UrlUnpadded::decode_vec(value).ok()?;
    serde_json::from_slice(&bytes)
        .map_err(|err| debug!("Ignoring unreadable session slot: {err}"))
        .ok()
}

#[derive(Debug, Clone)]
enum SlotWrite {
    Untouched,
    Saved(PersistedSession),
    Cleared,
}

/// Persisted slot backed by the `maxirent-auth-storage` cookie of one
/// request. Writes are collected and emitted with the response.
#[derive(Debug)]
pub struct CookieSlot {
    initial: Option<PersistedSession>,
    write: Mutex<SlotWrite>,
}

impl CookieSlot {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            initial: read_cookie(headers, STORAGE_KEY).and_then(|value| decode_slot(&value)),
            write: Mutex::new(SlotWrite::Untouched),
        }
    }

    /// `Set-Cookie` for whatever the store wrote, if it differs from what
    /// the client sent.
    #[must_use]
    pub fn set_cookie(&self, policy: &CookiePolicy) -> Option<HeaderValue> {
        let write = self
            .write
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match write {
            SlotWrite::Untouched => None,
            SlotWrite::Saved(session) if Some(&session) == self.initial.as_ref() => None,
            SlotWrite::Saved(session) => policy.set(STORAGE_KEY, &encode_slot(&session)?, false),
            SlotWrite::Cleared if self.initial.is_none() => None,
            SlotWrite::Cleared => policy.clear(STORAGE_KEY, false),
        }
    }
}

impl SessionSlot for CookieSlot {
    fn load(&self) -> Option<PersistedSession> {
        match &*self.write.lock().unwrap_or_else(PoisonError::into_inner) {
            SlotWrite::Untouched => self.initial.clone(),
            SlotWrite::Saved(session) => Some(session.clone()),
            SlotWrite::Cleared => None,
        }
    }

    fn save(&self, session: &PersistedSession) {
        *self.write.lock().unwrap_or_else(PoisonError::into_inner) =
            SlotWrite::Saved(session.clone());
    }

    fn clear(&self) {
        *self.write.lock().unwrap_or_else(PoisonError::into_inner) = SlotWrite::Cleared;
    }
}
