//! Expiry bookkeeping for access tokens.
//!
//! The signature is never checked here; the identity service validates the
//! token on every `/user` call. Claims are only read to decide when to renew.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Deserialize;

use crate::auth::SessionTokens;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// `exp` claim of a JWT access token, if it can be read.
#[must_use]
pub fn access_token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<ExpiryClaim>(&bytes).ok()?.exp
}

/// Whether the access token is expired or expires within `margin_seconds`.
/// Tokens with no known expiry are left alone.
#[must_use]
pub fn needs_refresh(tokens: &SessionTokens, now: i64, margin_seconds: i64) -> bool {
    tokens
        .expires_at
        .or_else(|| access_token_expiry(&tokens.access_token))
        .is_some_and(|expires_at| expires_at - margin_seconds <= now)
}
