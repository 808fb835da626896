//! API handlers and the helpers they share.
//!
//! Every handler opens a request-scoped session from the cookies (or from the
//! tokens the gate already renewed), runs one store operation and writes the
//! resulting cookies back, on failures too.

pub mod auth;
pub mod health;
pub mod profile;
pub mod users;

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{Identity, SessionError},
    gate::{RequestSession, ResolvedTokens, Sessions},
};

/// Failure body: `{ "success": false, "error": "<reason>" }`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Success body carrying the signed-in identity.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub success: bool,
    pub user: Identity,
}

impl UserResponse {
    #[must_use]
    pub fn new(user: Identity) -> Self {
        Self {
            success: true,
            user,
        }
    }
}

/// Success body with nothing else to say.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[must_use]
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidCredentials | SessionError::InvalidOtp | SessionError::NotAuthenticated => {
            StatusCode::UNAUTHORIZED
        }
        SessionError::ProfileNotFound | SessionError::AccountDisabled | SessionError::Forbidden => {
            StatusCode::FORBIDDEN
        }
        SessionError::Superseded => StatusCode::CONFLICT,
        SessionError::Rejected(_) => StatusCode::BAD_REQUEST,
        SessionError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub(crate) fn error_response(err: &SessionError) -> Response {
    (status_for(err), Json(ErrorResponse::new(err.to_string()))).into_response()
}

pub(crate) fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

pub(crate) fn open_session(
    sessions: &Sessions,
    headers: &HeaderMap,
    resolved: Option<Extension<ResolvedTokens>>,
) -> RequestSession {
    sessions.open(headers, resolved.map(|Extension(tokens)| tokens))
}

/// Render `result` and attach the session cookies.
pub(crate) fn respond<T: IntoResponse>(
    session: &RequestSession,
    result: Result<T, SessionError>,
) -> Response {
    let mut response = match result {
        Ok(body) => body.into_response(),
        Err(err) => error_response(&err),
    };
    for cookie in session.set_cookies() {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Resolve the caller through the identity service. The slot cookie is
/// client-writable, so it is never trusted for authorization.
pub(crate) async fn authenticated(session: &RequestSession) -> Result<Identity, SessionError> {
    session
        .store()
        .initialize()
        .await?
        .ok_or(SessionError::NotAuthenticated)
}

fn trimmed(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
