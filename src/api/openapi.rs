use super::handlers::{auth, health, profile, users, Ack, ErrorResponse, UserResponse};
use crate::auth::{Identity, NewUser, ProfileUpdate, Role};
use utoipa::OpenApi;

/// `OpenAPI` document of the gateway's own endpoints. Proxied frontend
/// routes are not part of it.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::request_otp,
        auth::verify_otp,
        auth::logout,
        auth::session,
        auth::reset_password,
        profile::get_profile,
        profile::patch_profile,
        profile::change_password,
        users::create_user,
    ),
    components(schemas(
        Identity,
        Role,
        ProfileUpdate,
        NewUser,
        Ack,
        ErrorResponse,
        UserResponse,
        auth::LoginRequest,
        auth::OtpRequest,
        auth::OtpVerifyRequest,
        auth::ResetPasswordRequest,
        profile::ChangePasswordRequest,
        health::Health,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Sign-in, sign-out and session state"),
        (name = "profile", description = "Self-service profile"),
        (name = "admin", description = "Account administration")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
