//! Error types shared across all ombud crates.

/// Errors that can occur across the ombud runtime.
///
/// The supervisor's fail-over ladder dispatches on the variant: a
/// `SessionExpired` triggers re-authentication, a `Login` failure triggers
/// a browser rebuild, and a `Fetch` error gets a bounded generic retry.
/// The remaining variants are local to their subsystems and never drive
/// recovery decisions.
#[derive(Debug, thiserror::Error)]
pub enum OmbudError {
    /// The portal redirected to the login form where a dashboard was expected.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// A login sub-step (navigation, captcha, form submission) failed.
    #[error("login failed: {0}")]
    Login(String),

    /// Dashboard scrape or detail fetch failed for a non-session reason.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Chat platform API call failed.
    #[error("chat error: {0}")]
    Chat(String),

    /// Ledger file read/write failure.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Headless browser driver failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OmbudError {
    /// True if the error indicates an expired portal session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, OmbudError::SessionExpired(_))
    }

    /// True if the error came from a failed login attempt.
    pub fn is_login_failure(&self) -> bool {
        matches!(self, OmbudError::Login(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            OmbudError::SessionExpired("dashboard not visible".into()).to_string(),
            "session expired: dashboard not visible"
        );
        assert_eq!(
            OmbudError::Login("captcha parse".into()).to_string(),
            "login failed: captcha parse"
        );
        assert_eq!(
            OmbudError::Fetch("navigation timeout".into()).to_string(),
            "fetch error: navigation timeout"
        );
        assert_eq!(
            OmbudError::Ledger("disk full".into()).to_string(),
            "ledger error: disk full"
        );
    }

    #[test]
    fn kind_predicates() {
        assert!(OmbudError::SessionExpired("x".into()).is_session_expired());
        assert!(!OmbudError::Fetch("x".into()).is_session_expired());
        assert!(OmbudError::Login("x".into()).is_login_failure());
        assert!(!OmbudError::Chat("x".into()).is_login_failure());
    }
}
