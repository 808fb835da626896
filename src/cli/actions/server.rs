use crate::{
    api::{self, ApiConfig, Gateway, Proxy},
    auth::{IdentityService, ProfileStore},
    backend::{GoTrueClient, GoTrueConfig, MemoryBackend, PgProfileStore},
    cli::{commands::backend, telemetry},
    gate::{CookiePolicy, Sessions},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub backend: backend::Options,
    pub upstream_url: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: u64,
    pub cookie_secure: Option<bool>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the backends cannot be reached or configured, or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = Arc::new(ApiConfig::new(&args.frontend_base_url)?);
    let cookies = CookiePolicy {
        secure: args.cookie_secure.unwrap_or_else(|| config.is_https()),
        max_age_seconds: args.session_ttl_seconds,
    };

    let (identity, profiles) = backends(args.backend).await?;
    let proxy = Proxy::new(&args.upstream_url)?;

    info!(
        upstream = %args.upstream_url,
        frontend = %args.frontend_base_url,
        secure_cookies = cookies.secure,
        "Starting gateway"
    );

    let gateway = Gateway {
        sessions: Arc::new(Sessions::new(identity, profiles, cookies)),
        proxy,
        config,
    };

    let result = api::new(args.port, gateway).await;
    telemetry::shutdown_tracer();
    result
}

async fn backends(
    options: backend::Options,
) -> Result<(Arc<dyn IdentityService>, Arc<dyn ProfileStore>)> {
    match options {
        backend::Options::Demo => {
            warn!("Demo mode: serving seeded in-memory accounts, OTP codes are logged");
            let memory = MemoryBackend::new();
            memory.seed_demo();
            let identity: Arc<dyn IdentityService> = Arc::new(memory.clone());
            let profiles: Arc<dyn ProfileStore> = Arc::new(memory);
            Ok((identity, profiles))
        }
        backend::Options::Hosted(hosted) => {
            if hosted.service_role_key.is_none() {
                warn!("No service role key: username sign-in and user creation are disabled");
            }
            let identity = GoTrueClient::new(GoTrueConfig {
                project_url: hosted.supabase_url,
                anon_key: hosted.anon_key,
                service_role_key: hosted.service_role_key,
                refresh_margin: hosted.refresh_margin_seconds,
            })
            .context("Failed to configure identity service client")?;
            let identity: Arc<dyn IdentityService> = Arc::new(identity);
            let profiles: Arc<dyn ProfileStore> =
                Arc::new(PgProfileStore::connect(&hosted.dsn).await?);
            Ok((identity, profiles))
        }
    }
}
