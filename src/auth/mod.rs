//! Role-based authorization and session state.
//!
//! - [`role`]: the closed role set and the static permission table.
//! - [`store`]: the session store every sign-in flow goes through.
//! - [`provider`]: seams to the identity service and the profile table.

pub mod error;
pub mod identity;
pub mod persist;
pub mod phone;
pub mod provider;
pub mod role;
pub mod store;

pub use error::{ProviderError, SessionError};
pub use identity::{Identity, NewProfile, NewUser, ProfileUpdate};
pub use persist::{MemorySlot, PersistedSession, SessionSlot, STORAGE_KEY};
pub use phone::normalize_phone;
pub use provider::{
    AuthSubject, IdentityProvider, IdentityService, ProfileStore, ProviderFuture, SessionTokens,
    StoreFuture,
};
pub use role::{grant_for, Grant, Role};
pub use store::{SessionSnapshot, SessionStore, SessionWatcher};

use regex::Regex;
use std::sync::OnceLock;

static EMAIL_SHAPE: OnceLock<Option<Regex>> = OnceLock::new();

/// Lightweight e-mail shape check, used to tell usernames from e-mails.
pub fn valid_email(email: &str) -> bool {
    EMAIL_SHAPE
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}
