//! Persisted slice of the session (identity + authenticated flag).

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use super::identity::Identity;

/// Key of the persisted slot.
pub const STORAGE_KEY: &str = "maxirent-auth-storage";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: Option<Identity>,
    pub is_authenticated: bool,
}

impl PersistedSession {
    #[must_use]
    pub fn new(user: Option<Identity>) -> Self {
        let is_authenticated = user.is_some();
        Self {
            user,
            is_authenticated,
        }
    }

    /// Restored identity. An inconsistent record restores as signed out.
    #[must_use]
    pub fn into_user(self) -> Option<Identity> {
        if self.is_authenticated {
            self.user
        } else {
            None
        }
    }
}

/// Key-value slot the store restores from and writes through to.
pub trait SessionSlot: Send + Sync {
    fn load(&self) -> Option<PersistedSession>;
    fn save(&self, session: &PersistedSession);
    fn clear(&self);
}

/// Slot kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<PersistedSession>>,
}

impl MemorySlot {
    #[must_use]
    pub fn with(session: PersistedSession) -> Self {
        Self {
            value: Mutex::new(Some(session)),
        }
    }
}

impl SessionSlot for MemorySlot {
    fn load(&self) -> Option<PersistedSession> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, session: &PersistedSession) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    }

    fn clear(&self) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
