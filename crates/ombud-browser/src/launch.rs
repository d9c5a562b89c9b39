//! Chrome/Chromium discovery and headless process launch.
//!
//! The browser is started with `--remote-debugging-port=0`; the kernel
//! assigns a free port and Chrome announces it on stderr as
//! `DevTools listening on ws://...`. The page target's WebSocket URL is
//! then looked up through the DevTools HTTP endpoint (`/json/list`).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::BrowserError;

/// How long to wait for the DevTools endpoint announcement on stderr.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Prefix of the stderr line carrying the browser WebSocket URL.
const DEVTOOLS_BANNER: &str = "DevTools listening on ";

/// Monotonic suffix so concurrent launches never share a profile directory.
static LAUNCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Well-known browser binary locations, most preferred first.
fn candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(not(target_os = "macos"))]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
            "/usr/lib/chromium/chromium",
        ]
    }
}

/// Locate a Chrome-family binary.
///
/// `override_path` (the `CHROME_BIN` setting) wins when set; otherwise the
/// first existing well-known path is used.
pub fn find_browser(override_path: Option<&str>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = override_path {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(BrowserError::LaunchFailed {
            reason: format!("configured browser binary {} does not exist", path.display()),
        });
    }

    candidate_paths()
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or(BrowserError::NoBrowserFound)
}

/// A freshly launched headless browser process and its DevTools endpoints.
pub struct LaunchedBrowser {
    /// The child process; killed when the owning session shuts down.
    pub process: Child,
    /// WebSocket URL of the default page target.
    pub page_ws_url: String,
}

/// Spawn a headless browser and resolve its default page target.
pub async fn launch(override_path: Option<&str>) -> Result<LaunchedBrowser, BrowserError> {
    let binary = find_browser(override_path)?;

    let profile_dir = std::env::temp_dir().join(format!(
        "ombud-browser-{}-{}",
        std::process::id(),
        LAUNCH_SEQ.fetch_add(1, Ordering::Relaxed),
    ));
    std::fs::create_dir_all(&profile_dir).map_err(|e| BrowserError::LaunchFailed {
        reason: format!("cannot create profile dir {}: {e}", profile_dir.display()),
    })?;

    tracing::info!(binary = %binary.display(), "launching headless browser");

    let mut process = Command::new(&binary)
        .arg("--headless=new")
        .arg("--remote-debugging-port=0")
        .arg(format!("--user-data-dir={}", profile_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::LaunchFailed {
            reason: format!("cannot spawn {}: {e}", binary.display()),
        })?;

    let stderr = process.stderr.take().ok_or_else(|| BrowserError::LaunchFailed {
        reason: "browser stderr was not captured".to_string(),
    })?;

    let browser_ws = tokio::time::timeout(LAUNCH_TIMEOUT, read_devtools_banner(stderr))
        .await
        .map_err(|_| BrowserError::LaunchFailed {
            reason: format!("no DevTools endpoint announced within {LAUNCH_TIMEOUT:?}"),
        })??;

    let port = devtools_port(&browser_ws).ok_or_else(|| BrowserError::LaunchFailed {
        reason: format!("cannot parse DevTools port from {browser_ws}"),
    })?;

    let page_ws_url = resolve_page_target(port).await?;

    tracing::info!(port, "browser ready");

    Ok(LaunchedBrowser { process, page_ws_url })
}

/// Scan the browser's stderr for the DevTools announcement line.
async fn read_devtools_banner(
    stderr: tokio::process::ChildStderr,
) -> Result<String, BrowserError> {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(url) = line.strip_prefix(DEVTOOLS_BANNER) {
            let url = url.trim().to_string();
            // Keep draining stderr so the browser never blocks on a full
            // pipe once we stop caring about its output.
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            return Ok(url);
        }
    }
    Err(BrowserError::LaunchFailed {
        reason: "browser exited before announcing its DevTools endpoint".to_string(),
    })
}

/// Extract the port from a `ws://127.0.0.1:<port>/devtools/browser/...` URL.
fn devtools_port(ws_url: &str) -> Option<u16> {
    let rest = ws_url.strip_prefix("ws://")?;
    let authority = rest.split('/').next()?;
    authority.rsplit(':').next()?.parse().ok()
}

/// Ask the DevTools HTTP endpoint for the default page target.
async fn resolve_page_target(port: u16) -> Result<String, BrowserError> {
    let list_url = format!("http://127.0.0.1:{port}/json/list");

    let targets: serde_json::Value = reqwest::get(&list_url)
        .await
        .map_err(|e| BrowserError::ConnectionFailed {
            url: list_url.clone(),
            reason: e.to_string(),
        })?
        .json()
        .await
        .map_err(|e| BrowserError::Protocol {
            detail: format!("invalid target list: {e}"),
        })?;

    targets
        .as_array()
        .and_then(|arr| {
            arr.iter().find(|t| {
                t.get("type").and_then(serde_json::Value::as_str) == Some("page")
            })
        })
        .and_then(|t| t.get("webSocketDebuggerUrl"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol {
            detail: "no page target exposed by the browser".to_string(),
        })
}
