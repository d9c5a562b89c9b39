//! Error types for the ombud-browser crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while launching or driving the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No Chrome or Chromium binary could be found.
    #[error("no Chrome or Chromium binary found (set CHROME_BIN to override)")]
    NoBrowserFound,

    /// The browser process could not be started or did not announce
    /// its DevTools endpoint.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed { reason: String },

    /// Failed to establish the DevTools WebSocket connection.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError { code: i64, message: String },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level failure (serialization, closed socket, bad frame).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// Navigation was rejected by the browser (e.g. DNS failure).
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// In-page JavaScript threw.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// An element never became visible within the wait window.
    #[error("element {selector:?} not visible after {duration:?}")]
    VisibilityTimeout { selector: String, duration: Duration },

    /// A selector matched nothing when a node was required.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },
}
