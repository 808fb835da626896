use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::gate::{self, Sessions};

pub mod handlers;
mod openapi;
pub mod proxy;

pub use openapi::openapi;
pub use proxy::Proxy;

use handlers::{auth, health, profile, users};

/// Public-facing settings the API needs to build links.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    frontend_base_url: Url,
}

impl ApiConfig {
    /// # Errors
    /// Returns an error if `frontend_base_url` is not a valid URL.
    pub fn new(frontend_base_url: &str) -> Result<Self> {
        let frontend_base_url = Url::parse(frontend_base_url)
            .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
        Ok(Self { frontend_base_url })
    }

    /// Where password-reset e-mails land.
    #[must_use]
    pub fn reset_password_url(&self) -> String {
        let mut url = self.frontend_base_url.clone();
        url.set_path("/reset-password");
        url.set_query(None);
        url.to_string()
    }

    #[must_use]
    pub fn is_https(&self) -> bool {
        self.frontend_base_url.scheme() == "https"
    }
}

/// Everything the router needs.
#[derive(Clone)]
pub struct Gateway {
    pub sessions: Arc<Sessions>,
    pub proxy: Proxy,
    pub config: Arc<ApiConfig>,
}

/// Build the gateway application: API routes, the proxy fallback, the gate
/// around both, and the request-id and trace layers.
pub fn app(gateway: Gateway) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/otp", post(auth::request_otp))
        .route("/api/auth/otp/verify", post(auth::verify_otp))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route(
            "/api/profile",
            get(profile::get_profile).patch(profile::patch_profile),
        )
        .route("/api/profile/password", post(profile::change_password))
        .route("/api/admin/users", post(users::create_user))
        .fallback(proxy::proxy)
        .layer(middleware::from_fn_with_state(
            gateway.sessions.clone(),
            gate::gate,
        ));

    routes.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(gateway.sessions))
            .layer(Extension(gateway.proxy))
            .layer(Extension(gateway.config)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, gateway: Gateway) -> Result<()> {
    let app = app(gateway);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
