//! Sign-in, sign-out and session endpoints under `/api/auth`.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use super::{bad_request, open_session, respond, trimmed, Ack, ErrorResponse, UserResponse};
use crate::{
    api::ApiConfig,
    auth::valid_email,
    gate::{ResolvedTokens, Sessions},
};

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Username or e-mail.
    pub identifier: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequest {
    pub phone: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct OtpVerifyRequest {
    pub phone: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = UserResponse),
        (status = 400, description = "Missing identifier or password", body = ErrorResponse),
        (status = 401, description = "Invalid login credentials", body = ErrorResponse),
        (status = 403, description = "No active profile behind the account", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let (Some(identifier), false) = (trimmed(&request.identifier), request.password.is_empty())
    else {
        return bad_request("Identifier and password are required");
    };

    let session = open_session(&sessions, &headers, resolved);
    let result = session.store().sign_in(identifier, &request.password).await;
    respond(&session, result.map(|user| Json(UserResponse::new(user))))
}

#[utoipa::path(
    post,
    path = "/api/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Code sent", body = Ack),
        (status = 400, description = "Missing phone or rejected by the identity service", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn request_otp(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(request): Json<OtpRequest>,
) -> Response {
    let Some(phone) = trimmed(&request.phone) else {
        return bad_request("Phone number is required");
    };

    let session = open_session(&sessions, &headers, resolved);
    let result = session.store().sign_in_with_phone(phone).await;
    respond(&session, result.map(|()| Json(Ack::ok())))
}

#[utoipa::path(
    post,
    path = "/api/auth/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Signed in", body = UserResponse),
        (status = 401, description = "Invalid or expired code", body = ErrorResponse),
        (status = 403, description = "No active profile behind the phone", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify_otp(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(request): Json<OtpVerifyRequest>,
) -> Response {
    let (Some(phone), Some(code)) = (trimmed(&request.phone), trimmed(&request.code)) else {
        return bad_request("Phone number and code are required");
    };

    let session = open_session(&sessions, &headers, resolved);
    let result = session.store().verify_otp(phone, code).await;
    respond(&session, result.map(|user| Json(UserResponse::new(user))))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = Ack)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
) -> Response {
    let session = open_session(&sessions, &headers, resolved);
    // Always clears locally, even if the identity service call fails.
    session.store().sign_out().await;
    respond(&session, Ok(Json(Ack::ok())))
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = UserResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn session(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
) -> Response {
    let session = open_session(&sessions, &headers, resolved);
    let result = session.store().initialize().await.map(|user| match user {
        Some(user) => Json(UserResponse::new(user)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    });
    respond(&session, result)
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Reset e-mail requested", body = Ack),
        (status = 400, description = "Invalid e-mail", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    config: Extension<Arc<ApiConfig>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Response {
    let email = request.email.trim();
    if !valid_email(email) {
        return bad_request("A valid e-mail address is required");
    }

    let session = open_session(&sessions, &headers, resolved);
    let result = session
        .store()
        .reset_password(email, &config.reset_password_url())
        .await;
    respond(&session, result.map(|()| Json(Ack::ok())))
}
