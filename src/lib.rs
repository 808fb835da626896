//! # MAXIRENT session gateway
//!
//! `maxirent` sits in front of the workshop management frontend. It owns the
//! user session: it signs staff in through the hosted identity service
//! (password, username or SMS one-time code), loads their profile and role
//! from Postgres, and gates every page request by authentication and role.
//!
//! ## Roles and permissions
//!
//! Five roles exist (`ADMIN`, `JEFE_TALLER`, `ALMACENISTA`, `RECEPCIONISTA`,
//! `MECANICO`). Each maps to a fixed set of `<resource>.<action>` permission
//! keys; `ADMIN` holds the `*` wildcard. See [`auth::role`].
//!
//! ## Session lifecycle
//!
//! [`auth::SessionStore`] is the single source of truth for "who is signed in".
//! It publishes snapshots over a watch channel, persists `{user,
//! isAuthenticated}` to a slot, and ignores results of operations superseded
//! by a newer one.
//!
//! ## Request gate
//!
//! [`gate::gate`] runs before every route. Anonymous requests to protected
//! paths go to `/login`, signed-in users are sent away from `/login`, and
//! role-restricted prefixes such as `/admin` or `/warehouse` fail closed to
//! `/dashboard`. Renewed tokens are written back as cookies.

pub mod api;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod gate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
