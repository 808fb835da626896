//! Phone identifiers for OTP sign-in.

/// Country prefix applied to bare national numbers (Mexico).
pub const DEFAULT_COUNTRY_PREFIX: &str = "+52";

/// Turn a bare national number into an E.164-style identifier.
///
/// Inputs already starting with `+` are passed through untouched.
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("{DEFAULT_COUNTRY_PREFIX}{phone}")
    }
}
