//! Client for the hosted identity service (GoTrue REST API under `/auth/v1`).
//!
//! Flow Overview:
//! - [`GoTrueClient`] owns the HTTP client, the project URL and the API keys.
//! - [`GoTrueClient::connect`] opens a [`GoTrueSession`] that holds one token
//!   pair, resumed from cookies or empty.
//! - Sign-in and OTP verification store the issued pair; `current_user`
//!   renews it when the access token is expired, close to expiry, or rejected.
//!
//! The anon key authenticates public calls. Administrative lookups (e-mail by
//! user id, account creation) need the service-role key and fail with
//! [`ProviderError::NotConfigured`] without it.

use anyhow::{anyhow, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::jwt::needs_refresh;
use crate::auth::{
    AuthSubject, IdentityProvider, IdentityService, ProviderError, ProviderFuture, SessionTokens,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`.
    pub project_url: String,
    pub anon_key: SecretString,
    pub service_role_key: Option<SecretString>,
    /// Seconds before expiry at which the access token is renewed.
    pub refresh_margin: i64,
}

#[derive(Clone)]
pub struct GoTrueClient {
    http: Client,
    auth_url: Url,
    anon_key: SecretString,
    service_role_key: Option<SecretString>,
    refresh_margin: i64,
}

impl GoTrueClient {
    /// Build a client for the project at `config.project_url`.
    /// # Errors
    /// Returns an error if the URL is not http(s) or the HTTP client cannot be built.
    pub fn new(config: GoTrueConfig) -> Result<Self> {
        let auth_url = auth_base_url(&config.project_url)?;
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            auth_url,
            anon_key: config.anon_key,
            service_role_key: config.service_role_key,
            refresh_margin: config.refresh_margin,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.auth_url
            .join(path)
            .map_err(|err| ProviderError::Decode(format!("invalid endpoint {path}: {err}")))
    }

    /// Request authenticated with `bearer`; the anon key always travels as `apikey`.
    fn request(&self, method: Method, url: Url, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    fn public(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let url = self.endpoint(path)?;
        Ok(self.request(method, url, self.anon_key.expose_secret()))
    }

    fn admin(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let key = self
            .service_role_key
            .as_ref()
            .ok_or(ProviderError::NotConfigured("service role key"))?;
        let url = self.endpoint(path)?;
        Ok(self
            .http
            .request(method, url)
            .header("apikey", key.expose_secret())
            .bearer_auth(key.expose_secret()))
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<IssuedSession, ProviderError> {
        let request = self
            .public(Method::POST, "token")?
            .query(&[("grant_type", grant_type)])
            .json(&body);
        decode(send(request).await?).await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthSubject, ProviderError> {
        let url = self.endpoint("user")?;
        match send(self.request(Method::GET, url, access_token)).await {
            Ok(response) => Ok(decode::<UserRecord>(response).await?.into()),
            Err(ProviderError::Rejected { status, .. })
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::FORBIDDEN.as_u16() =>
            {
                Err(ProviderError::Unauthorized)
            }
            Err(err) => Err(err),
        }
    }

    /// Exchange a refresh token. `Ok(None)` means the refresh token is dead.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<SessionTokens>, ProviderError> {
        match self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(issued) => Ok(Some(issued.into_tokens(now()))),
            Err(ProviderError::Rejected { status, message })
                if status == StatusCode::BAD_REQUEST.as_u16()
                    || status == StatusCode::UNAUTHORIZED.as_u16() =>
            {
                debug!("Refresh token rejected: {message}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl IdentityService for GoTrueClient {
    fn connect(&self, tokens: Option<SessionTokens>) -> Arc<dyn IdentityProvider> {
        Arc::new(GoTrueSession {
            client: self.clone(),
            tokens: Mutex::new(tokens),
        })
    }
}

/// One client session against the identity service.
pub struct GoTrueSession {
    client: GoTrueClient,
    tokens: Mutex<Option<SessionTokens>>,
}

impl GoTrueSession {
    fn set_tokens(&self, tokens: Option<SessionTokens>) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    fn take_tokens(&self) -> Option<SessionTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn store(&self, issued: IssuedSession) -> AuthSubject {
        let subject = AuthSubject::from(issued.user.clone());
        self.set_tokens(Some(issued.into_tokens(now())));
        subject
    }

    fn access_token(&self) -> Result<String, ProviderError> {
        self.tokens()
            .map(|tokens| tokens.access_token)
            .ok_or(ProviderError::Unauthorized)
    }

    async fn renew(&self, refresh_token: &str) -> Result<Option<SessionTokens>, ProviderError> {
        let renewed = self.client.refresh(refresh_token).await?;
        if renewed.is_none() {
            self.set_tokens(None);
        }
        if let Some(tokens) = &renewed {
            self.set_tokens(Some(tokens.clone()));
        }
        Ok(renewed)
    }

    async fn resolve(&self) -> Result<Option<AuthSubject>, ProviderError> {
        let Some(mut tokens) = self.tokens() else {
            return Ok(None);
        };

        let mut renewed = false;
        if needs_refresh(&tokens, now(), self.client.refresh_margin) {
            debug!("Access token expired or close to expiry, renewing");
            let Some(fresh) = self.renew(&tokens.refresh_token).await? else {
                return Ok(None);
            };
            tokens = fresh;
            renewed = true;
        }

        match self.client.fetch_user(&tokens.access_token).await {
            Ok(subject) => Ok(Some(subject)),
            Err(ProviderError::Unauthorized) if !renewed => {
                debug!("Access token rejected, renewing once");
                let Some(fresh) = self.renew(&tokens.refresh_token).await? else {
                    return Ok(None);
                };
                match self.client.fetch_user(&fresh.access_token).await {
                    Ok(subject) => Ok(Some(subject)),
                    Err(ProviderError::Unauthorized) => {
                        self.set_tokens(None);
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(ProviderError::Unauthorized) => {
                self.set_tokens(None);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl IdentityProvider for GoTrueSession {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let issued = self
                .client
                .token_grant("password", json!({ "email": email, "password": password }))
                .await
                .map_err(|err| match err {
                    ProviderError::Rejected { status, message }
                        if is_invalid_credentials(status, &message) =>
                    {
                        debug!("Password grant rejected: {message}");
                        ProviderError::InvalidCredentials
                    }
                    other => other,
                })?;
            Ok(self.store(issued))
        })
    }

    fn sign_in_with_otp<'a>(&'a self, phone: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .public(Method::POST, "otp")?
                .json(&json!({ "phone": phone, "create_user": false }));
            send(request).await?;
            Ok(())
        })
    }

    fn verify_otp<'a>(&'a self, phone: &'a str, code: &'a str) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let request = self
                .client
                .public(Method::POST, "verify")?
                .json(&json!({ "type": "sms", "phone": phone, "token": code }));
            let response = send(request).await.map_err(|err| match err {
                ProviderError::Rejected { status, message }
                    if status != StatusCode::TOO_MANY_REQUESTS.as_u16() && status < 500 =>
                {
                    debug!("OTP rejected: {message}");
                    ProviderError::InvalidOtp
                }
                other => other,
            })?;
            let issued: IssuedSession = decode(response).await?;
            Ok(self.store(issued))
        })
    }

    fn sign_out(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            // Local tokens go first so a failed call still leaves us signed out.
            let Some(tokens) = self.take_tokens() else {
                return Ok(());
            };
            let url = self.client.endpoint("logout")?;
            match send(self.client.request(Method::POST, url, &tokens.access_token)).await {
                Ok(_) => Ok(()),
                Err(ProviderError::Rejected { status, .. })
                    if status == StatusCode::UNAUTHORIZED.as_u16()
                        || status == StatusCode::NOT_FOUND.as_u16() =>
                {
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    fn current_user(&self) -> ProviderFuture<'_, Option<AuthSubject>> {
        Box::pin(self.resolve())
    }

    fn email_for_user(&self, id: Uuid) -> ProviderFuture<'_, Option<String>> {
        Box::pin(async move {
            let request = self.client.admin(Method::GET, &format!("admin/users/{id}"))?;
            match send(request).await {
                Ok(response) => Ok(decode::<UserRecord>(response).await?.email()),
                Err(ProviderError::Rejected { status, .. })
                    if status == StatusCode::NOT_FOUND.as_u16() =>
                {
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn update_password<'a>(&'a self, password: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let access_token = self.access_token()?;
            let url = self.client.endpoint("user")?;
            let request = self
                .client
                .request(Method::PUT, url, &access_token)
                .json(&json!({ "password": password }));
            send(request).await?;
            Ok(())
        })
    }

    fn reset_password_for_email<'a>(
        &'a self,
        email: &'a str,
        redirect_to: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .public(Method::POST, "recover")?
                .query(&[("redirect_to", redirect_to)])
                .json(&json!({ "email": email }));
            send(request).await?;
            Ok(())
        })
    }

    fn create_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> ProviderFuture<'a, AuthSubject> {
        Box::pin(async move {
            let request = self.client.admin(Method::POST, "admin/users")?.json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
            }));
            let user: UserRecord = decode(send(request).await?).await?;
            Ok(user.into())
        })
    }

    fn tokens(&self) -> Option<SessionTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone, Deserialize)]
struct UserRecord {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

impl UserRecord {
    fn email(self) -> Option<String> {
        non_empty(self.email)
    }
}

impl From<UserRecord> for AuthSubject {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: non_empty(user.email),
            phone: non_empty(user.phone),
        }
    }
}

#[derive(Deserialize)]
struct IssuedSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserRecord,
}

impl IssuedSession {
    fn into_tokens(self, now: i64) -> SessionTokens {
        SessionTokens {
            expires_at: self
                .expires_at
                .or_else(|| self.expires_in.map(|seconds| now + seconds)),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
        }
    }
}

/// Error body; older and newer service versions use different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn reason(self, status: StatusCode) -> String {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
            .unwrap_or_else(|| status.to_string())
    }
}

/// Bad e-mail/password pairs. Other 400s from the password grant (e.g. an
/// unconfirmed e-mail) keep their own message.
fn is_invalid_credentials(status: u16, message: &str) -> bool {
    status == StatusCode::BAD_REQUEST.as_u16()
        && (message.eq_ignore_ascii_case("invalid login credentials")
            || message == "invalid_grant"
            || message == "invalid_credentials")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Derive `<project>/auth/v1/` from the project URL.
fn auth_base_url(project_url: &str) -> Result<Url> {
    let mut url = Url::parse(project_url.trim())
        .map_err(|err| anyhow!("invalid identity service URL {project_url}: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "invalid identity service URL {project_url}: expected http(s)"
        ));
    }
    let path = format!("{}/auth/v1/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

#[instrument(skip(request), level = "debug")]
async fn send(request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|err| ProviderError::Transport(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: ErrorBody = response.json().await.unwrap_or_default();
    let message = body.reason(status);
    if status.is_server_error() {
        warn!("Identity service returned {status}: {message}");
    }
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|err| ProviderError::Decode(err.to_string()))
}
