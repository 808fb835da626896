//! Session store: the single source of truth for who is signed in.
//!
//! Flow Overview:
//! 1) Construction restores the persisted slot; the store reports loading
//!    until its first operation settles.
//! 2) Every operation bumps the in-flight counter. Operations that replace
//!    the identity also take a generation number and commit only if no newer
//!    one started meanwhile; sign-out always commits. Side-effect operations
//!    (OTP dispatch, password changes, account creation) take no generation
//!    and never discard anyone's result.
//! 3) The identity restored from the slot is unconfirmed until an operation
//!    commits; a discarded result drops it rather than leaving it standing.
//! 4) Each commit publishes a new snapshot on a `watch` channel and writes the
//!    persisted slot through.
//!
//! Failures never escape as panics: every collaborator error becomes a
//! [`SessionError`] and the loading flag is cleared on every exit path.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{
    error::{ProviderError, SessionError},
    identity::{Identity, NewProfile, NewUser, ProfileUpdate},
    persist::{PersistedSession, SessionSlot},
    phone::normalize_phone,
    provider::{AuthSubject, IdentityProvider, ProfileStore, SessionTokens},
    role::Role,
    valid_email,
};

/// Permission required to create accounts.
pub const CREATE_USERS: &str = "users.create";

/// Immutable view of the session handed to consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    user: Option<Identity>,
    is_loading: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| roles.contains(&user.role))
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| user.role.grant().allows(permission))
    }
}

#[derive(Debug, Default)]
struct Tracked {
    snapshot: SessionSnapshot,
    generation: u64,
    in_flight: usize,
    settled: bool,
    confirmed: bool,
}

impl Tracked {
    fn refresh_loading(&mut self) {
        self.snapshot.is_loading = !self.settled || self.in_flight > 0;
    }
}

enum Outcome {
    Unchanged,
    Replace(Option<Identity>),
}

/// Receives snapshot changes from a [`SessionStore`].
pub struct SessionWatcher {
    rx: watch::Receiver<Tracked>,
}

impl SessionWatcher {
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.rx.borrow().snapshot.clone()
    }

    /// Wait for the next change. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<SessionSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().snapshot.clone())
    }
}

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    slot: Arc<dyn SessionSlot>,
    state: watch::Sender<Tracked>,
}

impl SessionStore {
    /// Build a store restored from `slot`. Call [`SessionStore::initialize`]
    /// to confirm the restored identity against the identity service.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        slot: Arc<dyn SessionSlot>,
    ) -> Self {
        let restored = slot.load().and_then(PersistedSession::into_user);
        let mut tracked = Tracked {
            snapshot: SessionSnapshot {
                user: restored,
                is_loading: true,
            },
            ..Tracked::default()
        };
        tracked.refresh_loading();
        let (state, _rx) = watch::channel(tracked);
        Self {
            provider,
            profiles,
            slot,
            state,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().snapshot.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            rx: self.state.subscribe(),
        }
    }

    /// Token pair held by the underlying identity session.
    #[must_use]
    pub fn tokens(&self) -> Option<SessionTokens> {
        self.provider.tokens()
    }

    #[must_use]
    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.state.borrow().snapshot.has_role(roles)
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.state.borrow().snapshot.has_permission(permission)
    }

    /// Sign in with a username or e-mail and a password.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidCredentials`] on a bad identifier or
    /// password, [`SessionError::ProfileNotFound`] when the account has no
    /// profile, and [`SessionError::Superseded`] when a newer operation
    /// replaced this one.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<Identity, SessionError> {
        let generation = self.begin();
        let result = self.password_sign_in(identifier.trim(), password).await;
        self.settle(generation, result).await
    }

    /// Request a one-time code for `phone`. The session itself is unchanged.
    ///
    /// # Errors
    /// Returns the identity service failure, mapped to a [`SessionError`].
    #[instrument(skip(self))]
    pub async fn sign_in_with_phone(&self, phone: &str) -> Result<(), SessionError> {
        self.enter();
        let phone = normalize_phone(phone);
        let result = self.provider.sign_in_with_otp(&phone).await.map_err(|err| {
            warn!("OTP dispatch failed: {err}");
            SessionError::from(err)
        });
        self.leave();
        result
    }

    /// Verify a one-time code and sign in.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidOtp`] for a wrong or expired code and
    /// [`SessionError::ProfileNotFound`] when the code was valid but the
    /// subject has no profile.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, phone: &str, code: &str) -> Result<Identity, SessionError> {
        let generation = self.begin();
        let phone = normalize_phone(phone);
        let result = match self.provider.verify_otp(&phone, code.trim()).await {
            Ok(subject) => self.identity_for(subject).await,
            Err(err) => {
                debug!("OTP verification failed: {err}");
                Err(SessionError::from(err))
            }
        };
        self.settle(generation, result).await
    }

    /// Sign out. Local state is cleared even if the identity service call
    /// fails.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        let generation = self.begin();
        if let Err(err) = self.provider.sign_out().await {
            warn!("Sign-out at the identity service failed, clearing local session anyway: {err}");
        }
        self.finish(generation, Outcome::Replace(None), true);
        info!("Signed out");
    }

    /// Re-resolve the identity without new credentials. Anything that keeps
    /// the identity from resolving leaves the session signed out.
    ///
    /// # Errors
    /// Returns [`SessionError::Superseded`] when a newer operation replaced
    /// this one.
    #[instrument(skip(self))]
    pub async fn refresh_user(&self) -> Result<Option<Identity>, SessionError> {
        let generation = self.begin();
        let user = self.resolve_current().await;
        self.commit_resolved(generation, user)
    }

    /// Resolve an existing identity-service session at startup.
    ///
    /// # Errors
    /// Returns [`SessionError::Superseded`] when a newer operation replaced
    /// this one.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<Option<Identity>, SessionError> {
        let generation = self.begin();
        let user = self.resolve_current().await;
        debug!(authenticated = user.is_some(), "Session initialized");
        self.commit_resolved(generation, user)
    }

    /// Apply self-service edits to the signed-in profile and reload it.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAuthenticated`] without a session and
    /// [`SessionError::Unavailable`] when the profile table fails.
    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Identity, SessionError> {
        let current = self.current_user()?;
        let generation = self.begin();
        let result = self.apply_profile_update(&current, update).await;
        self.settle(generation, result).await
    }

    /// Change the password of the signed-in account.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAuthenticated`] without a session, or the
    /// identity service rejection.
    #[instrument(skip(self, new_password))]
    pub async fn change_password(&self, new_password: &str) -> Result<(), SessionError> {
        self.current_user()?;
        self.enter();
        let result = self
            .provider
            .update_password(new_password)
            .await
            .map_err(SessionError::from);
        self.leave();
        result
    }

    /// Send a password-reset e-mail whose link lands on `redirect_to`.
    ///
    /// # Errors
    /// Returns the identity service failure, mapped to a [`SessionError`].
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), SessionError> {
        self.enter();
        let result = self
            .provider
            .reset_password_for_email(email.trim(), redirect_to)
            .await
            .map_err(SessionError::from);
        self.leave();
        result
    }

    /// Create an account and its profile on behalf of the signed-in
    /// administrator.
    ///
    /// # Errors
    /// Returns [`SessionError::Forbidden`] unless the caller holds
    /// `users.create`, or the collaborator failure.
    #[instrument(skip(self, user), fields(username = %user.username, role = %user.role))]
    pub async fn create_user(&self, user: &NewUser) -> Result<Identity, SessionError> {
        let creator = self.current_user()?;
        if !creator.role.grant().allows(CREATE_USERS) {
            return Err(SessionError::Forbidden);
        }
        self.enter();
        let result = self.provision_user(&creator, user).await;
        self.leave();
        if let Ok(created) = &result {
            info!(user_id = %created.id, "User created");
        }
        result
    }

    fn current_user(&self) -> Result<Identity, SessionError> {
        self.state
            .borrow()
            .snapshot
            .user
            .clone()
            .ok_or(SessionError::NotAuthenticated)
    }

    async fn password_sign_in(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Identity, SessionError> {
        let subject = match self.provider.sign_in_with_password(identifier, password).await {
            Ok(subject) => subject,
            Err(ProviderError::InvalidCredentials) if !valid_email(identifier) => {
                // Usernames are not sign-in identifiers upstream; retry once
                // with the e-mail registered for that username.
                let Some(email) = self.email_for_username(identifier).await else {
                    return Err(SessionError::InvalidCredentials);
                };
                self.provider
                    .sign_in_with_password(&email, password)
                    .await
                    .map_err(SessionError::from)?
            }
            Err(err) => {
                debug!("Password sign-in failed: {err}");
                return Err(SessionError::from(err));
            }
        };

        self.identity_for(subject).await
    }

    async fn email_for_username(&self, username: &str) -> Option<String> {
        let profile_id = match self.profiles.profile_id_by_username(username).await {
            Ok(id) => id?,
            Err(err) => {
                error!("Failed to look up username: {err:#}");
                return None;
            }
        };
        match self.provider.email_for_user(profile_id).await {
            Ok(email) => email,
            Err(err) => {
                error!("Failed to look up e-mail for {profile_id}: {err}");
                None
            }
        }
    }

    /// Load the profile for a freshly authenticated subject. Any failure here
    /// is a login failure, and the remote session is dropped with it.
    async fn identity_for(&self, subject: AuthSubject) -> Result<Identity, SessionError> {
        let result = match self.profiles.profile_by_id(subject.id).await {
            Ok(Some(identity)) if identity.is_active => return Ok(identity.with_email(subject.email)),
            Ok(Some(_)) => Err(SessionError::AccountDisabled),
            Ok(None) => Err(SessionError::ProfileNotFound),
            Err(err) => {
                error!("Failed to load profile {}: {err:#}", subject.id);
                Err(SessionError::Unavailable)
            }
        };
        if let Err(err) = self.provider.sign_out().await {
            warn!("Failed to drop identity session without profile: {err}");
        }
        result
    }

    async fn resolve_current(&self) -> Option<Identity> {
        let subject = match self.provider.current_user().await {
            Ok(subject) => subject?,
            Err(err) => {
                warn!("Failed to resolve identity session: {err}");
                return None;
            }
        };
        match self.profiles.profile_by_id(subject.id).await {
            Ok(Some(identity)) if identity.is_active => Some(identity.with_email(subject.email)),
            Ok(Some(_)) => {
                debug!("Profile {} is deactivated", subject.id);
                None
            }
            Ok(None) => {
                debug!("No profile for subject {}", subject.id);
                None
            }
            Err(err) => {
                error!("Failed to load profile {}: {err:#}", subject.id);
                None
            }
        }
    }

    async fn apply_profile_update(
        &self,
        current: &Identity,
        update: &ProfileUpdate,
    ) -> Result<Identity, SessionError> {
        if !update.is_empty() {
            match self.profiles.update_profile(current.id, update).await {
                Ok(true) => {}
                Ok(false) => return Err(SessionError::ProfileNotFound),
                Err(err) => {
                    error!("Failed to update profile {}: {err:#}", current.id);
                    return Err(SessionError::Unavailable);
                }
            }
        }
        match self.profiles.profile_by_id(current.id).await {
            Ok(Some(identity)) if identity.is_active => Ok(identity.with_email(current.email.clone())),
            Ok(Some(_)) => {
                if let Err(err) = self.provider.sign_out().await {
                    warn!("Failed to drop identity session of deactivated profile: {err}");
                }
                Err(SessionError::AccountDisabled)
            }
            Ok(None) => Err(SessionError::ProfileNotFound),
            Err(err) => {
                error!("Failed to reload profile {}: {err:#}", current.id);
                Err(SessionError::Unavailable)
            }
        }
    }

    async fn provision_user(
        &self,
        creator: &Identity,
        user: &NewUser,
    ) -> Result<Identity, SessionError> {
        let subject = self
            .provider
            .create_user(&user.email, &user.password)
            .await
            .map_err(SessionError::from)?;
        let profile = NewProfile::from_new_user(subject.id, user, Some(creator.id));
        if let Err(err) = self.profiles.insert_profile(&profile).await {
            error!("Failed to insert profile for {}: {err:#}", subject.id);
            return Err(SessionError::Unavailable);
        }
        match self.profiles.profile_by_id(subject.id).await {
            Ok(Some(identity)) => Ok(identity.with_email(subject.email)),
            Ok(None) => Err(SessionError::ProfileNotFound),
            Err(err) => {
                error!("Failed to load created profile {}: {err:#}", subject.id);
                Err(SessionError::Unavailable)
            }
        }
    }

    /// Start an operation that may replace the identity.
    fn begin(&self) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|tracked| {
            tracked.generation += 1;
            tracked.in_flight += 1;
            generation = tracked.generation;
            tracked.refresh_loading();
        });
        generation
    }

    /// Start an operation that leaves the identity alone. It counts towards
    /// loading but takes no generation.
    fn enter(&self) {
        self.state.send_modify(|tracked| {
            tracked.in_flight += 1;
            tracked.refresh_loading();
        });
    }

    fn leave(&self) {
        self.state.send_modify(|tracked| {
            tracked.in_flight = tracked.in_flight.saturating_sub(1);
            tracked.settled = true;
            tracked.refresh_loading();
        });
    }

    /// Close an operation. Returns whether `outcome` was applied.
    fn finish(&self, generation: u64, outcome: Outcome, force: bool) -> bool {
        let mut applied = false;
        self.state.send_modify(|tracked| {
            tracked.in_flight = tracked.in_flight.saturating_sub(1);
            tracked.settled = true;
            if force || tracked.generation == generation {
                applied = true;
                if let Outcome::Replace(user) = outcome {
                    self.store_user(tracked, user);
                }
            } else {
                debug!(generation, current = tracked.generation, "Discarding stale session result");
                if !tracked.confirmed && tracked.snapshot.user.is_some() {
                    debug!("Dropping unconfirmed restored identity");
                    self.store_user(tracked, None);
                }
            }
            tracked.refresh_loading();
        });
        applied
    }

    fn store_user(&self, tracked: &mut Tracked, user: Option<Identity>) {
        match &user {
            Some(_) => self.slot.save(&PersistedSession::new(user.clone())),
            None => self.slot.clear(),
        }
        tracked.snapshot.user = user;
        tracked.confirmed = true;
    }

    /// A discarded sign-in may have left its token pair on the identity
    /// session. Keep the tokens only if they belong to the committed user.
    async fn drop_foreign_tokens(&self) {
        let committed = {
            let tracked = self.state.borrow();
            // A newer operation is still running and settles the tokens itself.
            if tracked.in_flight > 0 {
                return;
            }
            tracked.snapshot.user.as_ref().map(|user| user.id)
        };
        match self.provider.current_user().await {
            Ok(None) => return,
            Ok(Some(holder)) if Some(holder.id) == committed => return,
            Ok(Some(_)) => {}
            Err(err) => warn!("Failed to check tokens of discarded sign-in: {err}"),
        }
        if let Err(err) = self.provider.sign_out().await {
            warn!("Failed to drop tokens of discarded sign-in: {err}");
        }
    }

    async fn settle(
        &self,
        generation: u64,
        result: Result<Identity, SessionError>,
    ) -> Result<Identity, SessionError> {
        match result {
            Ok(identity) => {
                if self.finish(generation, Outcome::Replace(Some(identity.clone())), false) {
                    info!(user_id = %identity.id, role = %identity.role, "Session established");
                    Ok(identity)
                } else {
                    self.drop_foreign_tokens().await;
                    Err(SessionError::Superseded)
                }
            }
            // No usable profile behind the account: never keep an identity.
            Err(err @ (SessionError::ProfileNotFound | SessionError::AccountDisabled)) => {
                self.finish(generation, Outcome::Replace(None), false);
                Err(err)
            }
            Err(err) => {
                self.finish(generation, Outcome::Unchanged, false);
                Err(err)
            }
        }
    }

    fn commit_resolved(
        &self,
        generation: u64,
        user: Option<Identity>,
    ) -> Result<Option<Identity>, SessionError> {
        if self.finish(generation, Outcome::Replace(user.clone()), false) {
            Ok(user)
        } else {
            Err(SessionError::Superseded)
        }
    }
}
