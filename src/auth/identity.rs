//! The canonical user record shared by the store, the gate and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::role::Role;

/// A profile row joined with the e-mail known to the identity service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub employee_id: Option<String>,
    pub specialization: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl Identity {
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        if email.is_some() {
            self.email = email;
        }
        self
    }
}

/// Self-service profile edits. Role, username and the active flag are not
/// editable here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.full_name.is_none()
            && self.avatar_url.is_none()
            && self.employee_id.is_none()
            && self.specialization.is_none()
    }
}

/// Account created by an administrator.
#[derive(Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
}

/// Profile row to insert once the identity service issued an id.
#[derive(Clone, Debug)]
pub struct NewProfile {
    pub id: Uuid,
    pub username: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub employee_id: Option<String>,
    pub specialization: Option<String>,
    pub created_by: Option<Uuid>,
}

impl NewProfile {
    #[must_use]
    pub fn from_new_user(id: Uuid, user: &NewUser, created_by: Option<Uuid>) -> Self {
        Self {
            id,
            username: user.username.clone(),
            phone: user.phone.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            employee_id: user.employee_id.clone(),
            specialization: user.specialization.clone(),
            created_by,
        }
    }
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("password", &"***")
            .field("username", &self.username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_detects_empty_patch() {
        assert!(ProfileUpdate::default().is_empty());
        let update = ProfileUpdate {
            full_name: Some("José Hernández".to_string()),
            ..ProfileUpdate::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn new_profile_copies_user_fields() {
        let id = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let user = NewUser {
            email: "mecanico3@maxirent.com".to_string(),
            password: "meca123".to_string(),
            username: "mecanico3".to_string(),
            full_name: "Luis Pérez".to_string(),
            phone: Some("5551000007".to_string()),
            role: Role::Mecanico,
            employee_id: Some("MEC003".to_string()),
            specialization: None,
        };
        let profile = NewProfile::from_new_user(id, &user, Some(admin));
        assert_eq!(profile.id, id);
        assert_eq!(profile.username, "mecanico3");
        assert_eq!(profile.role, Role::Mecanico);
        assert_eq!(profile.created_by, Some(admin));
        assert!(!format!("{user:?}").contains("meca123"));
    }
}
