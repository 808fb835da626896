//! Maps parsed command-line arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{backend, gateway, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let backend = backend::Options::parse(matches)?;
    let gateway = gateway::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        backend,
        upstream_url: gateway.upstream_url,
        frontend_base_url: gateway.frontend_base_url,
        session_ttl_seconds: gateway.session_ttl_seconds,
        cookie_secure: gateway.cookie_secure,
    }))
}
