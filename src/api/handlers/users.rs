//! Administrative account creation.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{Json, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::{authenticated, bad_request, open_session, respond, ErrorResponse, UserResponse};
use crate::{
    auth::{valid_email, NewUser},
    gate::{ResolvedTokens, Sessions},
};

#[utoipa::path(
    post,
    path = "/api/admin/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid user payload", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Caller lacks users.create", body = ErrorResponse)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn create_user(
    headers: HeaderMap,
    sessions: Extension<Arc<Sessions>>,
    resolved: Option<Extension<ResolvedTokens>>,
    Json(user): Json<NewUser>,
) -> Response {
    if let Err(message) = validate(&user) {
        return bad_request(message);
    }

    let session = open_session(&sessions, &headers, resolved);
    let result = match authenticated(&session).await {
        Ok(_) => session.store().create_user(&user).await,
        Err(err) => Err(err),
    };
    respond(
        &session,
        result.map(|created| (StatusCode::CREATED, Json(UserResponse::new(created)))),
    )
}

fn validate(user: &NewUser) -> Result<(), &'static str> {
    if !valid_email(user.email.trim()) {
        return Err("A valid e-mail address is required");
    }
    if user.username.trim().is_empty() || user.username.contains(char::is_whitespace) {
        return Err("Username must be a single word");
    }
    if user.full_name.trim().is_empty() {
        return Err("Full name is required");
    }
    if user.password.chars().count() < 6 {
        return Err("Password should be at least 6 characters");
    }
    Ok(())
}
