//! Self-service profile endpoints for the signed-in user.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use super::{
    authenticated, bad_request, open_session, respond, Ack, ErrorResponse, UserResponse,
};
use crate::{
    auth::ProfileUpdate,
    gate::{ResolvedTokens, Sessions},
};

/// Shortest password the identity service accepts.
const MIN_PASSWORD_LEN: usize = 6;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Profile of the signed-in user", body = UserResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    ),
    tag = "profile"
)]
#[instrument(skip_all)]
pub async fn get_profile(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
) -> Response {
    let session = open_session(&sessions, &headers, resolved);
    let result = authenticated(&session).await;
    respond(&session, result.map(|user| Json(UserResponse::new(user))))
}

#[utoipa::path(
    patch,
    path = "/api/profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 400, description = "No updates provided", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    ),
    tag = "profile"
)]
#[instrument(skip_all)]
pub async fn patch_profile(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(update): Json<ProfileUpdate>,
) -> Response {
    let update = normalize(update);
    if update.is_empty() {
        return bad_request("No updates provided");
    }

    let session = open_session(&sessions, &headers, resolved);
    let result = match authenticated(&session).await {
        Ok(_) => session.store().update_profile(&update).await,
        Err(err) => Err(err),
    };
    respond(&session, result.map(|user| Json(UserResponse::new(user))))
}

#[utoipa::path(
    post,
    path = "/api/profile/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = Ack),
        (status = 400, description = "Password too short or rejected", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    ),
    tag = "profile"
)]
#[instrument(skip_all)]
pub async fn change_password(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(request): Json<ChangePasswordRequest>,
) -> Response {
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return bad_request("Password should be at least 6 characters");
    }

    let session = open_session(&sessions, &headers, resolved);
    let result = match authenticated(&session).await {
        Ok(_) => session.store().change_password(&request.password).await,
        Err(err) => Err(err),
    };
    respond(&session, result.map(|()| Json(Ack::ok())))
}

/// Blank strings mean "no change".
fn normalize(update: ProfileUpdate) -> ProfileUpdate {
    let keep = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    ProfileUpdate {
        phone: keep(update.phone),
        full_name: keep(update.full_name),
        avatar_url: keep(update.avatar_url),
        employee_id: keep(update.employee_id),
        specialization: keep(update.specialization),
    }
}
