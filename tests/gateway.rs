#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{cookie_value, json_body, location, set_cookies, spawn_upstream, TestGateway};
use maxirent::{
    auth::Role,
    gate::cookies::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
};

#[tokio::test]
async fn anonymous_protected_page_redirects_to_login() {
    let gw = TestGateway::new(&spawn_upstream().await);

    let response = gw.get("/admin/users?tab=roles", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/login?tab=roles"));

    let response = gw.get("/dashboard", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/login"));
}

#[tokio::test]
async fn anonymous_public_pages_are_proxied() {
    let gw = TestGateway::new(&spawn_upstream().await);

    for path in ["/login", "/reset-password", "/manifest.json"] {
        let response = gw.get(path, None).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        let body = json_body(response).await;
        assert_eq!(body["path"], path);
    }
}

#[tokio::test]
async fn excluded_paths_skip_the_gate() {
    let gw = TestGateway::new(&spawn_upstream().await);

    let response = gw.get("/_next/static/chunks/app.js", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw.get("/images/logo.png", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
}

#[tokio::test]
async fn signed_in_user_on_login_goes_to_dashboard() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("recepcion2", Role::Recepcionista);

    let response = gw.get("/login", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/dashboard"));
}

#[tokio::test]
async fn role_restrictions_follow_stored_role() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, mecanico) = gw.signed_in("mecanico2", Role::Mecanico);
    let (_, almacenista) = gw.signed_in("almacen2", Role::Almacenista);
    let (_, admin) = gw.signed_in("admin2", Role::Admin);

    let response = gw.get("/warehouse/parts", Some(&mecanico)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/dashboard"));

    let response = gw.get("/mechanic/orders", Some(&mecanico)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw.get("/warehouse/parts", Some(&almacenista)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw.get("/admin", Some(&almacenista)).await;
    assert_eq!(location(&response), Some("/dashboard"));

    for path in ["/admin", "/warehouse", "/reception", "/mechanic", "/workshop-manager"] {
        let response = gw.get(path, Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn unknown_stored_role_fails_closed() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (id, tokens) = gw.signed_in("supervisor", Role::Admin);
    gw.backend.set_raw_role(id, "SUPERVISOR");

    let response = gw.get("/admin", Some(&tokens)).await;
    assert_eq!(location(&response), Some("/dashboard"));

    // Unrestricted pages stay reachable.
    let response = gw.get("/dashboard", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_profile_fails_closed_on_restricted_paths() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (id, tokens) = gw.signed_in("sinperfil", Role::Admin);
    gw.backend.remove_profile(id);

    let response = gw.get("/admin", Some(&tokens)).await;
    assert_eq!(location(&response), Some("/dashboard"));
}

#[tokio::test]
async fn expired_access_token_is_renewed_into_cookies() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("jefe2", Role::JefeTaller);
    gw.backend.expire_access_tokens();

    let response = gw.get("/dashboard", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let access = cookie_value(&response, ACCESS_TOKEN_COOKIE).expect("renewed access token");
    let refresh = cookie_value(&response, REFRESH_TOKEN_COOKIE).expect("renewed refresh token");
    assert_ne!(access, tokens.access_token);
    assert_ne!(refresh, tokens.refresh_token);

    let cookies = set_cookies(&response);
    assert!(cookies.iter().all(|cookie| cookie.contains("Path=/")));
    assert!(cookies
        .iter()
        .filter(|cookie| cookie.starts_with(ACCESS_TOKEN_COOKIE))
        .all(|cookie| cookie.contains("HttpOnly") && cookie.contains("Secure")));
}

#[tokio::test]
async fn lone_refresh_token_is_renewed() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("jefe3", Role::JefeTaller);

    let request = Request::builder()
        .uri("/dashboard")
        .header(
            header::COOKIE,
            format!("{REFRESH_TOKEN_COOKIE}={}", tokens.refresh_token),
        )
        .body(Body::empty())
        .unwrap();
    let response = gw.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_value(&response, ACCESS_TOKEN_COOKIE).is_some());
}

#[tokio::test]
async fn revoked_session_is_anonymous_and_cookies_cleared() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("revocado", Role::Recepcionista);
    gw.backend.expire_access_tokens();
    // Spend the refresh token once so the presented pair is dead.
    let first = gw.get("/dashboard", Some(&tokens)).await;
    assert_eq!(first.status(), StatusCode::OK);

    let response = gw.get("/dashboard", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/login"));
    assert_eq!(cookie_value(&response, ACCESS_TOKEN_COOKIE).as_deref(), Some(""));
    assert!(set_cookies(&response)
        .iter()
        .any(|cookie| cookie.starts_with(REFRESH_TOKEN_COOKIE) && cookie.contains("Max-Age=0")));
}

#[tokio::test]
async fn unavailable_identity_service_counts_as_anonymous() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("admin3", Role::Admin);
    gw.backend.set_identity_unavailable(true);

    let response = gw.get("/dashboard", Some(&tokens)).await;
    assert_eq!(location(&response), Some("/login"));

    let response = gw.get("/login", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn proxy_forwards_method_path_query_and_body() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("admin4", Role::Admin);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/workshop-manager/orders?draft=1&bay=3")
        .header(header::HOST, "taller.maxirent.com")
        .header(header::COOKIE, common::cookie_header(&tokens))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("cambio de aceite"))
        .unwrap();
    let response = gw.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-upstream")
            .and_then(|value| value.to_str().ok()),
        Some("frontend")
    );
    let body = json_body(response).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/workshop-manager/orders");
    assert_eq!(body["query"], "draft=1&bay=3");
    assert_eq!(body["body"], "cambio de aceite");
    assert_eq!(body["forwarded_host"], "taller.maxirent.com");
}

#[tokio::test]
async fn proxy_relays_upstream_status() {
    let gw = TestGateway::new(&spawn_upstream().await);
    let (_, tokens) = gw.signed_in("admin5", Role::Admin);

    let response = gw.get("/missing/page", Some(&tokens)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let gw = TestGateway::new(&format!("http://{addr}"));

    let response = gw.get("/login", None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn request_id_is_propagated() {
    let gw = TestGateway::new(&spawn_upstream().await);

    let response = gw.get("/login", None).await;
    assert!(response.headers().contains_key("x-request-id"));
}
