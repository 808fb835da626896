//! Reverse proxy to the page-rendering frontend.
//!
//! Requests that pass the gate and match no API route are replayed against
//! the upstream with the same method, path, query, headers and body. Bodies
//! are buffered; hop-by-hop headers are dropped in both directions.

use anyhow::{anyhow, Result};
use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Request},
    http::{
        header::{self, HeaderName},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
pub struct Proxy {
    client: Client,
    upstream: Url,
}

impl Proxy {
    /// Proxy to `upstream`, e.g. `http://frontend:3000`.
    /// # Errors
    /// Returns an error if the URL is not http(s) or the client cannot be built.
    pub fn new(upstream: &str) -> Result<Self> {
        let upstream = Url::parse(upstream)
            .map_err(|err| anyhow!("invalid upstream URL {upstream}: {err}"))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(anyhow!("invalid upstream URL {upstream}: expected http(s)"));
        }
        // Redirects belong to the browser, not to us.
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .redirect(Policy::none())
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self { client, upstream })
    }

    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        url.set_query(query);
        url
    }

    /// Forward `request` and relay the upstream response.
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let url = self.target(parts.uri.path(), parts.uri.query());

        let body = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(err) => {
                debug!("Rejecting request body: {err}");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let mut headers = strip_hop_by_hop(&parts.headers);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
        }
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let upstream = self
            .client
            .request(parts.method, url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await;

        let upstream = match upstream {
            Ok(response) => response,
            Err(err) => {
                error!("Upstream request to {url} failed: {err}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        match upstream.bytes().await {
            Ok(bytes) => {
                let mut response = Response::new(Body::from(bytes));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response.headers_mut().remove(header::CONTENT_LENGTH);
                response
            }
            Err(err) => {
                error!("Failed to read upstream response from {url}: {err}");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

/// Router fallback: everything without an API route goes upstream.
pub async fn proxy(Extension(proxy): Extension<Proxy>, request: Request) -> Response {
    proxy.forward(request).await
}
