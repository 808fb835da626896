//! Workshop roles and the static role → permission table.
//!
//! The table is process-wide and never mutated. Lookups fail closed: a role
//! string that does not name one of the five roles grants nothing.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Permission marker that grants everything.
pub const WILDCARD: &str = "*";

/// Closed set of workshop roles, stored as `user_role` in the profile table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    JefeTaller,
    Almacenista,
    Recepcionista,
    Mecanico,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Admin,
        Self::JefeTaller,
        Self::Almacenista,
        Self::Recepcionista,
        Self::Mecanico,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::JefeTaller => "JEFE_TALLER",
            Self::Almacenista => "ALMACENISTA",
            Self::Recepcionista => "RECEPCIONISTA",
            Self::Mecanico => "MECANICO",
        }
    }

    /// Permission grant for this role.
    #[must_use]
    pub const fn grant(self) -> Grant {
        match self {
            Self::Admin => Grant::All,
            Self::JefeTaller => Grant::Only(JEFE_TALLER),
            Self::Almacenista => Grant::Only(ALMACENISTA),
            Self::Recepcionista => Grant::Only(RECEPCIONISTA),
            Self::Mecanico => Grant::Only(MECANICO),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// What a role is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    All,
    Only(&'static [&'static str]),
}

impl Grant {
    pub const NONE: Self = Self::Only(&[]);

    #[must_use]
    pub fn allows(self, permission: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(list) => list.iter().any(|p| *p == WILDCARD || *p == permission),
        }
    }

    /// Permission strings as stored, with `*` standing for [`Grant::All`].
    #[must_use]
    pub fn permissions(self) -> Vec<&'static str> {
        match self {
            Self::All => vec![WILDCARD],
            Self::Only(list) => list.to_vec(),
        }
    }
}

/// Grant for a raw role name; anything outside the enumeration grants nothing.
#[must_use]
pub fn grant_for(role: &str) -> Grant {
    role.parse::<Role>().map_or(Grant::NONE, Role::grant)
}

const JEFE_TALLER: &[&str] = &[
    "vehicles.read",
    "vehicles.create",
    "vehicles.update",
    "workspaces.read",
    "workspaces.manage",
    "vehicle_entries.read",
    "vehicle_entries.assign",
    "vehicle_entries.update",
    "maintenance_tasks.read",
    "maintenance_tasks.manage",
    "parts_usage.approve",
    "notifications.read",
    "notifications.send",
    "reports.read",
];

const MECANICO: &[&str] = &[
    "vehicles.read",
    "workspaces.read",
    "vehicle_entries.read_assigned",
    "vehicle_entries.update_assigned",
    "maintenance_tasks.read_assigned",
    "maintenance_tasks.manage_assigned",
    "parts_usage.create",
    "parts_usage.read",
    "notifications.read",
];

const RECEPCIONISTA: &[&str] = &[
    "vehicles.read",
    "vehicles.create",
    "vehicle_entries.create",
    "vehicle_entries.read",
    "notifications.read",
];

const ALMACENISTA: &[&str] = &[
    "parts_inventory.read",
    "parts_inventory.manage",
    "parts_usage.read",
    "parts_usage.approve",
    "notifications.read",
    "notifications.send",
];
