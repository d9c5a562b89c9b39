//! Portal authentication.
//!
//! The login page guards itself with an arithmetic captcha rendered as
//! plain text (`5 + 3`) inside `li.captchaList span`. The flow is:
//! navigate, wait for the page, read and solve the captcha, fill the
//! form, submit, and give the portal a moment to settle.

use std::time::Duration;

use tracing::info;

use ombud_browser::PortalSession;
use ombud_types::OmbudError;

/// Field and control selectors on the login page.
const USERNAME_FIELD: &str = "#email_or_username";
const PASSWORD_FIELD: &str = "#password";
const CAPTCHA_FIELD: &str = "#captcha";
const CAPTCHA_TEXT: &str = "li.captchaList span";
const SUBMIT_BUTTON: &str = "button[type=submit]";

/// How long the portal gets to process the submitted form.
const SUBMIT_SETTLE: Duration = Duration::from_secs(3);

/// Log in to the portal through the given session.
///
/// Any failed step maps to [`OmbudError::Login`]; the supervisor reacts by
/// retrying and, if that keeps failing, rebuilding the browser session.
pub async fn login(
    session: &PortalSession,
    login_url: &str,
    username: &str,
    password: &str,
    wait_timeout: Duration,
) -> Result<(), OmbudError> {
    info!("navigating to login page");
    session
        .navigate(login_url)
        .await
        .map_err(|e| OmbudError::Login(format!("failed to load login page: {e}")))?;
    session
        .wait_visible("body", wait_timeout)
        .await
        .map_err(|e| OmbudError::Login(format!("login page did not render: {e}")))?;

    let captcha_text = session
        .inner_text(CAPTCHA_TEXT)
        .await
        .map_err(|e| OmbudError::Login(format!("captcha not found: {e}")))?;
    let answer = solve_captcha(&captcha_text)?;
    info!(captcha = %captcha_text, answer = %answer, "captcha solved");

    for (selector, value) in [
        (USERNAME_FIELD, username),
        (PASSWORD_FIELD, password),
        (CAPTCHA_FIELD, answer.as_str()),
    ] {
        session
            .fill(selector, value)
            .await
            .map_err(|e| OmbudError::Login(format!("cannot fill {selector}: {e}")))?;
    }

    session
        .click(SUBMIT_BUTTON)
        .await
        .map_err(|e| OmbudError::Login(format!("cannot submit login form: {e}")))?;
    tokio::time::sleep(SUBMIT_SETTLE).await;

    info!("login submitted");
    Ok(())
}

/// True if the current page shows the login form where a dashboard was
/// expected -- the portal's way of saying the session cookie died.
pub async fn is_session_expired(session: &PortalSession) -> bool {
    session
        .element_exists(USERNAME_FIELD)
        .await
        .unwrap_or(false)
}

/// Solve the arithmetic captcha.
///
/// The portal has only ever been observed to emit addition, but the other
/// three operators are accepted in case it starts varying. Division is
/// integer division, matching how the portal validates.
pub fn solve_captcha(text: &str) -> Result<String, OmbudError> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(OmbudError::Login(format!(
            "invalid captcha format {text:?} (expected 'A op B')"
        )));
    }

    let (a, b): (i64, i64) = match (parts[0].parse(), parts[2].parse()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => {
            return Err(OmbudError::Login(format!(
                "captcha operands are not numeric: {text:?}"
            )))
        }
    };

    let result = match parts[1] {
        "+" => a + b,
        "-" => a - b,
        "*" | "x" | "\u{00D7}" => a * b,
        "/" if b != 0 => a / b,
        op => {
            return Err(OmbudError::Login(format!(
                "unsupported captcha operator {op:?} in {text:?}"
            )))
        }
    };

    Ok(result.to_string())
}
