//! Per-request sessions built from cookies.

use axum::http::{HeaderMap, HeaderValue};
use std::sync::Arc;

use super::cookies::{presented_tokens, CookiePolicy, CookieSlot};
use crate::auth::{IdentityProvider, IdentityService, ProfileStore, SessionStore, SessionTokens};

/// Token pair the gate settled on for this request, after any renewal.
/// Handlers resume from it instead of the (possibly rotated) cookies.
#[derive(Debug, Clone)]
pub struct ResolvedTokens(pub Option<SessionTokens>);

/// Opens request-scoped sessions against the configured collaborators.
pub struct Sessions {
    identity: Arc<dyn IdentityService>,
    profiles: Arc<dyn ProfileStore>,
    cookies: CookiePolicy,
}

impl Sessions {
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityService>,
        profiles: Arc<dyn ProfileStore>,
        cookies: CookiePolicy,
    ) -> Self {
        Self {
            identity,
            profiles,
            cookies,
        }
    }

    #[must_use]
    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    #[must_use]
    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// Identity session resumed from `tokens`, for callers that need no store.
    #[must_use]
    pub fn connect(&self, tokens: Option<SessionTokens>) -> Arc<dyn IdentityProvider> {
        self.identity.connect(tokens)
    }

    /// Session store for one request, resumed from the gate's tokens when
    /// present and from the cookies otherwise.
    #[must_use]
    pub fn open(&self, headers: &HeaderMap, resolved: Option<ResolvedTokens>) -> RequestSession {
        let baseline = match resolved {
            Some(ResolvedTokens(tokens)) => tokens,
            None => presented_tokens(headers),
        };
        let slot = Arc::new(CookieSlot::from_headers(headers));
        let store = SessionStore::new(
            self.identity.connect(baseline.clone()),
            self.profiles.clone(),
            slot.clone(),
        );
        RequestSession {
            store,
            slot,
            baseline,
            cookies: self.cookies,
        }
    }
}

pub struct RequestSession {
    store: SessionStore,
    slot: Arc<CookieSlot>,
    baseline: Option<SessionTokens>,
    cookies: CookiePolicy,
}

impl RequestSession {
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// `Set-Cookie` values carrying this session back to the client.
    #[must_use]
    pub fn set_cookies(&self) -> Vec<HeaderValue> {
        let mut cookies = self
            .cookies
            .token_updates(self.baseline.as_ref(), self.store.tokens().as_ref());
        cookies.extend(self.slot.set_cookie(&self.cookies));
        cookies
    }
}
