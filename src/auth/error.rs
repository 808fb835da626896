//! Error types at the identity-service seam and at the session store boundary.

use thiserror::Error;

/// Failures reported by the identity-issuing service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Token has expired or is invalid")]
    InvalidOtp,
    #[error("No active session")]
    Unauthorized,
    #[error("identity service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("identity service unavailable: {0}")]
    Transport(String),
    #[error("unexpected identity service response: {0}")]
    Decode(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Structured failure returned by every session store operation.
///
/// `Display` is the human-readable reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Invalid or expired verification code")]
    InvalidOtp,
    #[error("No profile is associated with this account")]
    ProfileNotFound,
    #[error("This account has been deactivated")]
    AccountDisabled,
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("A newer session operation replaced this one")]
    Superseded,
    #[error("{0}")]
    Rejected(String),
    #[error("Service unavailable, try again later")]
    Unavailable,
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => Self::InvalidCredentials,
            ProviderError::InvalidOtp => Self::InvalidOtp,
            ProviderError::Unauthorized => Self::NotAuthenticated,
            ProviderError::Rejected { message, .. } => Self::Rejected(message),
            ProviderError::Transport(_)
            | ProviderError::Decode(_)
            | ProviderError::NotConfigured(_) => Self::Unavailable,
        }
    }
}
