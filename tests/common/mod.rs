#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use maxirent::{
    api::{self, ApiConfig, Gateway, Proxy},
    auth::{Role, SessionTokens},
    backend::MemoryBackend,
    gate::{cookies::ACCESS_TOKEN_COOKIE, cookies::REFRESH_TOKEN_COOKIE, CookiePolicy, Sessions},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

pub const FRONTEND: &str = "https://taller.maxirent.com";

pub struct TestGateway {
    pub backend: MemoryBackend,
    pub app: Router,
}

impl TestGateway {
    /// Gateway over a demo-seeded in-memory backend, proxying to `upstream`.
    pub fn new(upstream: &str) -> Self {
        let backend = MemoryBackend::new();
        backend.seed_demo();
        let sessions = Sessions::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            CookiePolicy {
                secure: true,
                max_age_seconds: 3600,
            },
        );
        let gateway = Gateway {
            sessions: Arc::new(sessions),
            proxy: Proxy::new(upstream).expect("upstream url"),
            config: Arc::new(ApiConfig::new(FRONTEND).expect("frontend url")),
        };
        Self {
            backend,
            app: api::app(gateway),
        }
    }

    /// Register a user and hand back a live token pair for them.
    pub fn signed_in(&self, username: &str, role: Role) -> (Uuid, SessionTokens) {
        let id = self.backend.add_user(
            username,
            &format!("{username}@maxirent.com"),
            None,
            "secreto123",
            role,
        );
        (id, self.backend.issue_session(id))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.expect("infallible")
    }

    pub async fn get(&self, uri: &str, tokens: Option<&SessionTokens>) -> Response<Body> {
        self.send(request(Method::GET, uri, tokens, None)).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        tokens: Option<&SessionTokens>,
        body: Value,
    ) -> Response<Body> {
        self.send(request(Method::POST, uri, tokens, Some(body))).await
    }

    pub async fn patch_json(
        &self,
        uri: &str,
        tokens: Option<&SessionTokens>,
        body: Value,
    ) -> Response<Body> {
        self.send(request(Method::PATCH, uri, tokens, Some(body))).await
    }
}

pub fn request(
    method: Method,
    uri: &str,
    tokens: Option<&SessionTokens>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "taller.maxirent.com");
    if let Some(tokens) = tokens {
        builder = builder.header(header::COOKIE, cookie_header(tokens));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn cookie_header(tokens: &SessionTokens) -> String {
    format!(
        "{ACCESS_TOKEN_COOKIE}={}; {REFRESH_TOKEN_COOKIE}={}",
        tokens.access_token, tokens.refresh_token
    )
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// Value the last `Set-Cookie` for `name` assigns.
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response).iter().rev().find_map(|cookie| {
        let (pair, _) = cookie.split_once(';')?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Token pair carried by the response cookies.
pub fn tokens_from(response: &Response<Body>) -> SessionTokens {
    SessionTokens {
        access_token: cookie_value(response, ACCESS_TOKEN_COOKIE).expect("access cookie"),
        refresh_token: cookie_value(response, REFRESH_TOKEN_COOKIE).expect("refresh cookie"),
        expires_at: None,
    }
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let status = if uri.path().starts_with("/missing") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };
    (
        status,
        [("x-upstream", "frontend")],
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "body": String::from_utf8_lossy(&body),
            "forwarded_host": header_value("x-forwarded-host"),
            "cookie": header_value("cookie"),
        })),
    )
}

/// Start a stand-in frontend that echoes each request as JSON. Paths under
/// `/missing` answer 404.
pub async fn spawn_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
