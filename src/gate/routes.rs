//! Route classification and role restrictions.

use crate::auth::Role;

/// Paths reachable without a session (prefix match).
pub const PUBLIC_ROUTES: &[&str] = &[
    "/login",
    "/reset-password",
    "/_next",
    "/favicon.ico",
    "/manifest.json",
    "/sw.js",
    "/sw-register.js",
];

/// API prefixes reachable without a session.
pub const PUBLIC_API_ROUTES: &[&str] = &["/api/auth"];

/// Paths the gate never sees.
const EXCLUDED_PREFIXES: &[&str] = &["/_next/static", "/_next/image", "/favicon.ico", "/health"];
const EXCLUDED_EXTENSIONS: &[&str] = &[".svg", ".png", ".jpg", ".jpeg", ".gif", ".webp"];

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Path prefix and the roles allowed under it.
pub const ROLE_RESTRICTIONS: &[(&str, &[Role])] = &[
    ("/admin", &[Role::Admin]),
    ("/workshop-manager", &[Role::Admin, Role::JefeTaller]),
    ("/warehouse", &[Role::Admin, Role::Almacenista]),
    ("/mechanic", &[Role::Admin, Role::JefeTaller, Role::Mecanico]),
    ("/reception", &[Role::Admin, Role::Recepcionista]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    PublicApi,
    Protected,
}

impl RouteClass {
    #[must_use]
    pub fn classify(path: &str) -> Self {
        if PUBLIC_ROUTES.iter().any(|route| path.starts_with(route)) {
            Self::Public
        } else if PUBLIC_API_ROUTES.iter().any(|route| path.starts_with(route)) {
            Self::PublicApi
        } else {
            Self::Protected
        }
    }

    #[must_use]
    pub fn requires_identity(self) -> bool {
        matches!(self, Self::Protected)
    }
}

#[must_use]
pub fn is_excluded(path: &str) -> bool {
    EXCLUDED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
        || EXCLUDED_EXTENSIONS
            .iter()
            .any(|extension| path.ends_with(extension))
}

/// Whether any role restriction covers `path`.
#[must_use]
pub fn is_restricted(path: &str) -> bool {
    ROLE_RESTRICTIONS
        .iter()
        .any(|(prefix, _)| path.starts_with(prefix))
}

/// Every restriction covering `path` must allow `role`. An unknown role is
/// allowed nowhere restricted.
#[must_use]
pub fn role_allowed(path: &str, role: Option<Role>) -> bool {
    ROLE_RESTRICTIONS
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix))
        .all(|(_, allowed)| role.is_some_and(|role| allowed.contains(&role)))
}
