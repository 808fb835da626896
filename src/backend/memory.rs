//! In-process identity service and profile table.
//!
//! Backs the test suites and the `--demo` mode, which seeds one account per
//! role for local development.
//! State is shared between every session opened from the same backend, so a
//! token pair issued to one request resumes on the next.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{
    AuthSubject, Identity, IdentityProvider, IdentityService, NewProfile, ProfileStore,
    ProfileUpdate, ProviderError, ProviderFuture, Role, SessionTokens, StoreFuture,
};

/// Lifetime of issued access tokens.
const ACCESS_TOKEN_TTL: i64 = 3600;
const REFRESH_TOKEN_TTL: i64 = 7 * 24 * 3600;

#[derive(Clone)]
struct Account {
    id: Uuid,
    email: Option<String>,
    phone: Option<String>,
    password: String,
}

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    profiles: HashMap<Uuid, Identity>,
    /// Raw role values that override the profile's role column.
    raw_roles: HashMap<Uuid, String>,
    access_tokens: HashMap<String, (Uuid, i64)>,
    refresh_tokens: HashMap<String, (Uuid, i64)>,
    otp_codes: HashMap<String, String>,
    reset_requests: Vec<(String, String)>,
    identity_unavailable: bool,
    profiles_unavailable: bool,
    sign_out_fails: bool,
    current_user_delay: Option<Duration>,
    profile_delay: Option<Duration>,
}

impl State {
    fn account_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.email.as_deref() == Some(email))
    }

    fn account_by_phone(&self, phone: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.phone.as_deref() == Some(phone))
    }

    fn account(&self, id: Uuid) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }

    fn issue(&mut self, id: Uuid) -> SessionTokens {
        let now = Utc::now().timestamp();
        self.prune(now);
        let access_token = format!("access-{}", Uuid::new_v4().simple());
        let refresh_token = format!("refresh-{}", Uuid::new_v4().simple());
        let expires_at = now + ACCESS_TOKEN_TTL;
        self.access_tokens
            .insert(access_token.clone(), (id, expires_at));
        self.refresh_tokens
            .insert(refresh_token.clone(), (id, now + REFRESH_TOKEN_TTL));
        SessionTokens {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
        }
    }

    /// Forget tokens of sessions abandoned without a sign-out.
    fn prune(&mut self, now: i64) {
        self.access_tokens.retain(|_, (_, expires_at)| *expires_at > now);
        self.refresh_tokens.retain(|_, (_, expires_at)| *expires_at > now);
    }

    fn revoke(&mut self, tokens: &SessionTokens) {
        self.access_tokens.remove(&tokens.access_token);
        self.refresh_tokens.remove(&tokens.refresh_token);
    }
}

fn subject(account: &Account) -> AuthSubject {
    AuthSubject {
        id: account.id,
        email: account.email.clone(),
        phone: account.phone.clone(),
    }
}

/// Shared in-memory backend. Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an account with an active profile and return its id.
    pub fn add_user(
        &self,
        username: &str,
        email: &str,
        phone: Option<&str>,
        password: &str,
        role: Role,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut state = self.state();
        state.accounts.push(Account {
            id,
            email: Some(email.to_string()),
            phone: phone.map(str::to_string),
            password: password.to_string(),
        });
        state.profiles.insert(
            id,
            Identity {
                id,
                username: username.to_string(),
                email: None,
                phone: phone.map(str::to_string),
                full_name: username.to_string(),
                role,
                employee_id: None,
                specialization: None,
                avatar_url: None,
                is_active: true,
                created_at: now,
                updated_at: now,
                created_by: None,
            },
        );
        id
    }

    /// Register an account that has no profile row.
    pub fn add_account(&self, email: &str, phone: Option<&str>, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().accounts.push(Account {
            id,
            email: Some(email.to_string()),
            phone: phone.map(str::to_string),
            password: password.to_string(),
        });
        id
    }

    /// Seed the five demo accounts, one per role.
    pub fn seed_demo(&self) {
        let demo = [
            ("admin", "admin123", Role::Admin, "5551000001"),
            ("jefetaller", "jefe123", Role::JefeTaller, "5551000002"),
            ("almacenista", "alma123", Role::Almacenista, "5551000003"),
            ("recepcionista", "recep123", Role::Recepcionista, "5551000004"),
            ("mecanico1", "meca123", Role::Mecanico, "5551000005"),
        ];
        for (username, password, role, phone) in demo {
            let email = format!("{username}@maxirent.com");
            let phone = format!("+52{phone}");
            self.add_user(username, &email, Some(&phone), password, role);
        }
    }

    /// Issue a fresh token pair for `id`, as if the user had signed in.
    pub fn issue_session(&self, id: Uuid) -> SessionTokens {
        self.state().issue(id)
    }

    #[must_use]
    pub fn profile(&self, id: Uuid) -> Option<Identity> {
        self.state().profiles.get(&id).cloned()
    }

    pub fn remove_profile(&self, id: Uuid) {
        self.state().profiles.remove(&id);
    }

    pub fn set_active(&self, id: Uuid, active: bool) {
        if let Some(profile) = self.state().profiles.get_mut(&id) {
            profile.is_active = active;
        }
    }

    /// Make `role_by_id` report `role` regardless of the stored profile.
    pub fn set_raw_role(&self, id: Uuid, role: &str) {
        self.state().raw_roles.insert(id, role.to_string());
    }

    /// Last one-time code texted to `phone`.
    #[must_use]
    pub fn last_otp(&self, phone: &str) -> Option<String> {
        self.state().otp_codes.get(phone).cloned()
    }

    /// Password-reset requests as `(email, redirect_to)`.
    #[must_use]
    pub fn reset_requests(&self) -> Vec<(String, String)> {
        self.state().reset_requests.clone()
    }

    #[must_use]
    pub fn password_of(&self, id: Uuid) -> Option<String> {
        self.state().account(id).map(|account| account.password.clone())
    }

    /// Move every access token's expiry into the past.
    pub fn expire_access_tokens(&self) {
        let past = Utc::now().timestamp() - 1;
        for (_, expires_at) in self.state().access_tokens.values_mut() {
            *expires_at = past;
        }
    }

    pub fn set_identity_unavailable(&self, unavailable: bool) {
        self.state().identity_unavailable = unavailable;
    }

    pub fn set_profiles_unavailable(&self, unavailable: bool) {
        self.state().profiles_unavailable = unavailable;
    }

    pub fn set_sign_out_fails(&self, fails: bool) {
        self.state().sign_out_fails = fails;
    }

    /// Delay every `current_user` call, to interleave concurrent operations.
    pub fn set_current_user_delay(&self, delay: Option<Duration>) {
        self.state().current_user_delay = delay;
    }

    /// Delay every profile lookup by id.
    pub fn set_profile_delay(&self, delay: Option<Duration>) {
        self.state().profile_delay = delay;
    }

    fn profiles_guard(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.state();
        if state.profiles_unavailable {
            return Err(anyhow!("profile table unavailable"));
        }
        Ok(state)
    }
}

impl IdentityService for MemoryBackend {
    fn connect(&self, tokens: Option<SessionTokens>) -> Arc<dyn IdentityProvider> {
        Arc::new(MemorySession {
            backend: self.clone(),
            tokens: Mutex::new(tokens),
        })
    }
}

pub struct MemorySession {
    backend: MemoryBackend,
    tokens: Mutex<Option<SessionTokens>>,
}

impl MemorySession {
    fn held(&self) -> MutexGuard<'_, Option<SessionTokens>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn service(&self) -> Result<MutexGuard<'_, State>, ProviderError> {
        let state = self.backend.state();
        if state.identity_unavailable {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        Ok(state)
    }

    fn establish(&self, id: Uuid, state: &mut State) -> Option<AuthSubject> {
        let tokens = state.issue(id);
        *self.held() = Some(tokens);
        state.account(id).map(subject)
    }

    fn resolve(&self) -> Result<Option<AuthSubject>, ProviderError> {
        let Some(tokens) = self.held().clone() else {
            return Ok(None);
        };
        let mut state = self.service()?;
        let now = Utc::now().timestamp();
        let id = match state.access_tokens.get(&tokens.access_token) {
            Some(&(id, expires_at)) if expires_at > now => id,
            _ => {
                state.access_tokens.remove(&tokens.access_token);
                let refreshed = state
                    .refresh_tokens
                    .remove(&tokens.refresh_token)
                    .filter(|&(_, expires_at)| expires_at > now);
                let Some((id, _)) = refreshed else {
                    debug!("Refresh token unknown, session is gone");
                    *self.held() = None;
                    return Ok(None);
                };
                let renewed = state.issue(id);
                *self.held() = Some(renewed);
                id
            }
        };
        Ok(state.account(id).map(subject))
    }
}

impl IdentityProvider for MemorySession {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let mut state = self.service()?;
            let id = match state.account_by_email(email) {
                Some(account) if account.password == password => account.id,
                _ => return Err(ProviderError::InvalidCredentials),
            };
            self.establish(id, &mut state)
                .ok_or(ProviderError::InvalidCredentials)
        })
    }

    fn sign_in_with_otp<'a>(&'a self, phone: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.service()?;
            if state.account_by_phone(phone).is_none() {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "Signups not allowed for otp".to_string(),
                });
            }
            let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
            info!("One-time code for {phone}: {code}");
            state.otp_codes.insert(phone.to_string(), code);
            Ok(())
        })
    }

    fn verify_otp<'a>(&'a self, phone: &'a str, code: &'a str) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let mut state = self.service()?;
            if state.otp_codes.get(phone).map(String::as_str) != Some(code) {
                return Err(ProviderError::InvalidOtp);
            }
            state.otp_codes.remove(phone);
            let id = state
                .account_by_phone(phone)
                .map(|account| account.id)
                .ok_or(ProviderError::InvalidOtp)?;
            self.establish(id, &mut state).ok_or(ProviderError::InvalidOtp)
        })
    }

    fn sign_out(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            let Some(tokens) = self.held().take() else {
                return Ok(());
            };
            let mut state = self.service()?;
            if state.sign_out_fails {
                return Err(ProviderError::Transport("sign-out timed out".to_string()));
            }
            state.revoke(&tokens);
            Ok(())
        })
    }

    fn current_user(&self) -> ProviderFuture<'_, Option<AuthSubject>> {
        Box::pin(async move {
            let delay = self.backend.state().current_user_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.resolve()
        })
    }

    fn email_for_user(&self, id: Uuid) -> ProviderFuture<'_, Option<String>> {
        Box::pin(async move {
            let state = self.service()?;
            Ok(state.account(id).and_then(|account| account.email.clone()))
        })
    }

    fn update_password<'a>(&'a self, password: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let Some(id) = self.resolve()?.map(|subject| subject.id) else {
                return Err(ProviderError::Unauthorized);
            };
            if password.len() < 6 {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "Password should be at least 6 characters".to_string(),
                });
            }
            let mut state = self.service()?;
            if let Some(account) = state.accounts.iter_mut().find(|account| account.id == id) {
                account.password = password.to_string();
            }
            Ok(())
        })
    }

    fn reset_password_for_email<'a>(
        &'a self,
        email: &'a str,
        redirect_to: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.service()?;
            // Unknown addresses are accepted silently.
            state
                .reset_requests
                .push((email.to_string(), redirect_to.to_string()));
            Ok(())
        })
    }

    fn create_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let mut state = self.service()?;
            if state.account_by_email(email).is_some() {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "A user with this email address has already been registered"
                        .to_string(),
                });
            }
            let account = Account {
                id: Uuid::new_v4(),
                email: Some(email.to_string()),
                phone: None,
                password: password.to_string(),
            };
            let created = subject(&account);
            state.accounts.push(account);
            Ok(created)
        })
    }

    fn tokens(&self) -> Option<SessionTokens> {
        self.held().clone()
    }
}

impl ProfileStore for MemoryBackend {
    fn profile_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Identity>> {
        Box::pin(async move {
            let delay = self.state().profile_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.profiles_guard()?.profiles.get(&id).cloned())
        })
    }

    fn profile_id_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<Uuid>> {
        Box::pin(async move {
            Ok(self
                .profiles_guard()?
                .profiles
                .values()
                .find(|profile| profile.username == username)
                .map(|profile| profile.id))
        })
    }

    fn role_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let state = self.profiles_guard()?;
            if let Some(role) = state.raw_roles.get(&id) {
                return Ok(Some(role.clone()));
            }
            Ok(state
                .profiles
                .get(&id)
                .map(|profile| profile.role.as_str().to_string()))
        })
    }

    fn update_profile<'a>(&'a self, id: Uuid, update: &'a ProfileUpdate) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.profiles_guard()?;
            let Some(profile) = state.profiles.get_mut(&id) else {
                return Ok(false);
            };
            if let Some(phone) = &update.phone {
                profile.phone = Some(phone.clone());
            }
            if let Some(full_name) = &update.full_name {
                profile.full_name.clone_from(full_name);
            }
            if let Some(avatar_url) = &update.avatar_url {
                profile.avatar_url = Some(avatar_url.clone());
            }
            if let Some(employee_id) = &update.employee_id {
                profile.employee_id = Some(employee_id.clone());
            }
            if let Some(specialization) = &update.specialization {
                profile.specialization = Some(specialization.clone());
            }
            profile.updated_at = Utc::now();
            Ok(true)
        })
    }

    fn insert_profile<'a>(&'a self, profile: &'a NewProfile) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.profiles_guard()?;
            if state
                .profiles
                .values()
                .any(|existing| existing.username == profile.username)
            {
                return Err(anyhow!("username {} already exists", profile.username));
            }
            let now = Utc::now();
            state.profiles.insert(
                profile.id,
                Identity {
                    id: profile.id,
                    username: profile.username.clone(),
                    email: None,
                    phone: profile.phone.clone(),
                    full_name: profile.full_name.clone(),
                    role: profile.role,
                    employee_id: profile.employee_id.clone(),
                    specialization: profile.specialization.clone(),
                    avatar_url: None,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                    created_by: profile.created_by,
                },
            );
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.profiles_guard()?;
            Ok(())
        })
    }
}
