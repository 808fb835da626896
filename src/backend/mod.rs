//! Collaborator implementations behind the [`crate::auth`] seams.
//!
//! - [`gotrue`]: the hosted identity service over HTTP.
//! - [`postgres`]: the `profiles` table.
//! - [`memory`]: both in process, for tests and demo mode.

pub mod gotrue;
pub mod jwt;
pub mod memory;
pub mod postgres;

pub use gotrue::{GoTrueClient, GoTrueConfig};
pub use memory::MemoryBackend;
pub use postgres::PgProfileStore;
