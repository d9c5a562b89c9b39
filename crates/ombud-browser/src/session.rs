//! High-level portal session over one headless browser process.
//!
//! All page interaction funnels through `Runtime.evaluate`: element waits
//! are readiness polls, form filling assigns `.value` and fires the input
//! events the portal's scripts listen for, and authenticated API calls run
//! as in-page `fetch()` so the session cookies ride along automatically.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Child;

use crate::cdp::CdpClient;
use crate::error::BrowserError;
use crate::launch;

/// Poll interval for readiness and visibility loops.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One live browser session against the portal.
///
/// Methods take `&self`; the underlying CDP client serializes wire access,
/// so a session can be shared across the detail-fetch workers and the
/// resolution caller concurrently.
pub struct PortalSession {
    client: CdpClient,
    process: Mutex<Option<Child>>,
}

impl PortalSession {
    /// Launch a fresh headless browser and connect to its page target.
    pub async fn launch(chrome_bin: Option<&str>) -> Result<Self, BrowserError> {
        let browser = launch::launch(chrome_bin).await?;
        let client = CdpClient::connect(&browser.page_ws_url).await?;

        client.enable_domain("Page").await?;
        client.enable_domain("Runtime").await?;

        Ok(Self {
            client,
            process: Mutex::new(Some(browser.process)),
        })
    }

    /// Build a session over an already-connected client (tests).
    pub fn from_client(client: CdpClient) -> Self {
        Self {
            client,
            process: Mutex::new(None),
        }
    }

    /// Navigate and wait until the document has finished loading.
    ///
    /// The readiness poll is unbounded; callers wrap navigation in their
    /// own timeout scope (`navigation_timeout` in the portal crate).
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let result = self
            .client
            .send_command("Page.navigate", serde_json::json!({ "url": url }))
            .await?;

        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(BrowserError::NavigationFailed {
                    reason: error_text.to_string(),
                });
            }
        }

        loop {
            let state = self.evaluate("document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Evaluate a JavaScript expression and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        self.eval_inner(expression, false).await
    }

    /// Evaluate an async expression (a Promise) and return its resolution.
    ///
    /// Used for in-page `fetch()` calls against the portal API; without
    /// `awaitPromise` the browser would hand back the pending Promise
    /// object instead of the response.
    pub async fn evaluate_async(&self, expression: &str) -> Result<Value, BrowserError> {
        self.eval_inner(expression, true).await
    }

    async fn eval_inner(&self, expression: &str, await_promise: bool) -> Result<Value, BrowserError> {
        let result = self
            .client
            .send_command(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": await_promise,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| exception.get("text").and_then(Value::as_str))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Wait until the selector matches a visibly rendered element.
    pub async fn wait_visible(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let probe = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; \
             const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0; }})()",
            sel = js_string(selector),
        );

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evaluate(&probe).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::VisibilityTimeout {
                    selector: selector.to_string(),
                    duration: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Trimmed text content of the first element matching the selector.
    pub async fn inner_text(&self, selector: &str) -> Result<String, BrowserError> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             return el ? el.innerText.trim() : null; }})()",
            sel = js_string(selector),
        );
        match self.evaluate(&expr).await? {
            Value::String(text) => Ok(text),
            _ => Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            }),
        }
    }

    /// True if the selector matches any element.
    pub async fn element_exists(&self, selector: &str) -> Result<bool, BrowserError> {
        let expr = format!(
            "document.querySelector({sel}) !== null",
            sel = js_string(selector),
        );
        Ok(self.evaluate(&expr).await?.as_bool().unwrap_or(false))
    }

    /// Fill a form field and fire the `input`/`change` events the page
    /// scripts hook.
    pub async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; \
             el.focus(); el.value = {val}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            sel = js_string(selector),
            val = js_string(text),
        );
        self.require_element(selector, &expr).await
    }

    /// Click the first element matching the selector.
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; el.click(); return true; }})()",
            sel = js_string(selector),
        );
        self.require_element(selector, &expr).await
    }

    async fn require_element(&self, selector: &str, expr: &str) -> Result<(), BrowserError> {
        if self.evaluate(expr).await?.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    /// Kill the browser process and drop the connection.
    ///
    /// Idempotent; also invoked when the supervisor replaces the session.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.process.lock() {
            if let Some(child) = guard.as_mut() {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "browser process already gone");
                }
            }
            guard.take();
        }
        self.client.close();
    }
}

impl Drop for PortalSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render text as a JavaScript string literal.
///
/// JSON string syntax is valid JavaScript, so serde's encoder doubles as a
/// safe quoting layer for selectors and user-supplied values.
pub fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}
