//! Collaborator seams: the identity-issuing service and the profile table.
//!
//! Both are object-safe so the gateway can hold them behind `Arc<dyn _>` and
//! tests can swap in the in-memory backend.

use std::{fmt, future::Future, pin::Pin, sync::Arc};
use uuid::Uuid;

use super::{
    error::ProviderError,
    identity::{Identity, NewProfile, ProfileUpdate},
};

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Subject issued by the identity service after authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSubject {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Access/refresh token pair carried in the session cookies.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds; `None` when the issuer did not say.
    pub expires_at: Option<i64>,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One client session against the identity service.
///
/// Implementations keep the current token pair internally, the way a browser
/// SDK client does, and rotate it on sign-in, refresh and sign-out.
pub trait IdentityProvider: Send + Sync {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> ProviderFuture<'a, AuthSubject>;

    /// Ask the service to text a one-time code to `phone` (already normalized).
    fn sign_in_with_otp<'a>(&'a self, phone: &'a str) -> ProviderFuture<'a, ()>;

    fn verify_otp<'a>(&'a self, phone: &'a str, code: &'a str) -> ProviderFuture<'a, AuthSubject>;

    fn sign_out(&self) -> ProviderFuture<'_, ()>;

    /// Validate the held session, renewing it when the access token is
    /// expired or close to expiry. `Ok(None)` means there is no usable session.
    fn current_user(&self) -> ProviderFuture<'_, Option<AuthSubject>>;

    /// Administrative lookup of the e-mail registered for a subject.
    fn email_for_user(&self, id: Uuid) -> ProviderFuture<'_, Option<String>>;

    fn update_password<'a>(&'a self, password: &'a str) -> ProviderFuture<'a, ()>;

    fn reset_password_for_email<'a>(
        &'a self,
        email: &'a str,
        redirect_to: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Administrative account creation with the e-mail already confirmed.
    fn create_user<'a>(&'a self, email: &'a str, password: &'a str)
        -> ProviderFuture<'a, AuthSubject>;

    /// Token pair currently held, if any.
    fn tokens(&self) -> Option<SessionTokens>;
}

/// Opens client sessions, optionally resuming from a stored token pair.
pub trait IdentityService: Send + Sync {
    fn connect(&self, tokens: Option<SessionTokens>) -> Arc<dyn IdentityProvider>;
}

/// Access to the `profiles` table.
pub trait ProfileStore: Send + Sync {
    fn profile_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Identity>>;

    fn profile_id_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<Uuid>>;

    /// Raw `role` column; callers must not assume it parses.
    fn role_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<String>>;

    /// Returns `false` when no row matched.
    fn update_profile<'a>(&'a self, id: Uuid, update: &'a ProfileUpdate) -> StoreFuture<'a, bool>;

    fn insert_profile<'a>(&'a self, profile: &'a NewProfile) -> StoreFuture<'a, ()>;

    /// Cheap liveness probe used by `/health`.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
