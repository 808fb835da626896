//! Request gate: resolves the caller from session cookies and decides
//! whether a request passes, goes to `/login`, or goes to `/dashboard`.
//!
//! Flow Overview:
//! 1) Excluded paths (static assets, `/health`) pass untouched.
//! 2) The token cookies resume an identity session; an expired access token
//!    is renewed there. Resolution errors count as anonymous.
//! 3) Anonymous callers on protected routes go to `/login`; signed-in
//!    callers on `/login` go to `/dashboard`.
//! 4) On role-restricted prefixes the role is read from the profile table,
//!    never from token claims; a missing or unknown role goes to
//!    `/dashboard`.
//! 5) Renewed token cookies ride on whatever response comes back.

pub mod cookies;
pub mod routes;
pub mod session;

pub use cookies::{CookiePolicy, CookieSlot};
pub use routes::RouteClass;
pub use session::{RequestSession, ResolvedTokens, Sessions};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::auth::{AuthSubject, Role};
use cookies::{prepend_set_cookies, presented_tokens};
use routes::{is_excluded, is_restricted, role_allowed, DASHBOARD_PATH, LOGIN_PATH};

/// axum middleware; install with `middleware::from_fn_with_state`.
pub async fn gate(State(sessions): State<Arc<Sessions>>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if is_excluded(&path) {
        return next.run(request).await;
    }

    let presented = presented_tokens(request.headers());
    let provider = sessions.connect(presented.clone());
    let subject = match provider.current_user().await {
        Ok(subject) => subject,
        Err(err) => {
            warn!("Treating request as anonymous, identity resolution failed: {err}");
            None
        }
    };
    let resolved = provider.tokens();
    let renewals = sessions
        .cookies()
        .token_updates(presented.as_ref(), resolved.as_ref());

    let mut response = match redirect_target(&sessions, &path, subject.as_ref()).await {
        Some(target) => {
            debug!(%path, target, "Gate redirect");
            redirect(target, request.uri().query())
        }
        None => {
            request.extensions_mut().insert(ResolvedTokens(resolved));
            next.run(request).await
        }
    };

    prepend_set_cookies(response.headers_mut(), renewals);
    response
}

async fn redirect_target(
    sessions: &Sessions,
    path: &str,
    subject: Option<&AuthSubject>,
) -> Option<&'static str> {
    let Some(subject) = subject else {
        return RouteClass::classify(path)
            .requires_identity()
            .then_some(LOGIN_PATH);
    };

    if path == LOGIN_PATH {
        return Some(DASHBOARD_PATH);
    }

    if is_restricted(path) {
        let role = stored_role(sessions, subject).await;
        if !role_allowed(path, role) {
            return Some(DASHBOARD_PATH);
        }
    }

    None
}

async fn stored_role(sessions: &Sessions, subject: &AuthSubject) -> Option<Role> {
    match sessions.profiles().role_by_id(subject.id).await {
        Ok(Some(raw)) => raw
            .parse()
            .map_err(|err| warn!(user_id = %subject.id, "Unrecognized stored role: {err}"))
            .ok(),
        Ok(None) => {
            debug!(user_id = %subject.id, "No profile for subject");
            None
        }
        Err(err) => {
            error!(user_id = %subject.id, "Failed to read role: {err:#}");
            None
        }
    }
}

/// 307 to `target`, keeping the original query string.
fn redirect(target: &str, query: Option<&str>) -> Response {
    match query {
        Some(query) if !query.is_empty() => {
            Redirect::temporary(&format!("{target}?{query}")).into_response()
        }
        _ => Redirect::temporary(target).into_response(),
    }
}
