//! Environment-driven configuration for the supervisor.
//!
//! Values come from process environment variables with a `.env` file as
//! fallback (`dotenvy`). The struct is built once at startup and stays
//! immutable afterwards, so it can be shared freely across tasks.

use std::time::Duration;

use crate::OmbudError;

/// Default dashboard list path, including the filter query the portal
/// expects for "open complaints in this subdivision".
const DEFAULT_DASHBOARD_PATH: &str =
    "/dashboard_complaint_list?from_date=&to_date=&honame=1&coname=21&doname=24&sdoname=87&cStatus=2&commobile=";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Portal credentials. Required.
    pub username: String,
    pub password: String,

    /// Base URL of the complaint portal; API paths derive from this.
    pub base_url: String,
    /// Login page URL (defaults to the base URL).
    pub login_url: String,
    /// Dashboard URL with filters applied.
    pub dashboard_url: String,

    /// Retry budget and pacing.
    pub max_login_retries: u32,
    pub login_retry_delay: Duration,
    pub max_fetch_retries: u32,

    /// Hard cap on dashboard pages walked per cycle.
    pub max_pages: u32,

    /// Timing for the periodic cycle and individual browser operations.
    pub fetch_interval: Duration,
    pub fetch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub wait_timeout: Duration,

    /// Chat platform credentials. Required.
    pub bot_token: String,
    pub chat_id: i64,

    /// Detail-fetch concurrency and ledger write batching.
    pub worker_pool_size: usize,
    pub batch_size: usize,

    /// Port for the `/health` HTTP endpoint.
    pub health_port: u16,

    /// When set, outbound chat and portal mutations are logged, not sent.
    pub debug_mode: bool,

    /// Path of the on-disk ledger file.
    pub ledger_path: String,

    /// Key for the external translation service, if deployed alongside.
    pub translate_api_key: Option<String>,

    /// Explicit browser binary override (otherwise discovered).
    pub chrome_bin: Option<String>,
}

impl Config {
    /// Load configuration from the process environment, with `.env` fallback.
    pub fn from_env() -> Result<Self, OmbudError> {
        // Missing .env is the normal case in production; env vars win.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// This is the testable core of [`from_env`](Self::from_env): tests pass
    /// a closure over a map instead of mutating the process environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, OmbudError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = get_or(&get, "PORTAL_BASE_URL", "https://complaint.dgvcl.com");
        let base_trimmed = base_url.trim_end_matches('/').to_string();

        let chat_id_raw = get("TELEGRAM_CHAT_ID").unwrap_or_default();
        if chat_id_raw.trim().is_empty() {
            return Err(OmbudError::Config("TELEGRAM_CHAT_ID is required".into()));
        }
        let chat_id = chat_id_raw.trim().parse::<i64>().map_err(|_| {
            OmbudError::Config(format!("TELEGRAM_CHAT_ID must be a numeric chat id, got {chat_id_raw:?}"))
        })?;

        let cfg = Self {
            username: get("PORTAL_USERNAME").unwrap_or_default(),
            password: get("PORTAL_PASSWORD").unwrap_or_default(),

            login_url: get_or(&get, "LOGIN_URL", &format!("{base_trimmed}/")),
            dashboard_url: get_or(
                &get,
                "DASHBOARD_URL",
                &format!("{base_trimmed}{DEFAULT_DASHBOARD_PATH}"),
            ),
            base_url: base_trimmed,

            max_login_retries: get_u32(&get, "MAX_LOGIN_RETRIES", 3),
            login_retry_delay: get_secs(&get, "LOGIN_RETRY_DELAY_SECS", 5),
            max_fetch_retries: get_u32(&get, "MAX_FETCH_RETRIES", 2),

            max_pages: get_u32(&get, "MAX_PAGES", 5),

            fetch_interval: get_secs(&get, "FETCH_INTERVAL_SECS", 15 * 60),
            fetch_timeout: get_secs(&get, "FETCH_TIMEOUT_SECS", 10 * 60),
            navigation_timeout: get_secs(&get, "NAVIGATION_TIMEOUT_SECS", 60),
            wait_timeout: get_secs(&get, "WAIT_TIMEOUT_SECS", 45),

            bot_token: get("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            chat_id,

            worker_pool_size: get_u32(&get, "WORKER_POOL_SIZE", 10) as usize,
            batch_size: get_u32(&get, "BATCH_SIZE", 50) as usize,

            health_port: get_u32(&get, "HEALTH_CHECK_PORT", 8080) as u16,

            debug_mode: get("DEBUG_MODE").as_deref() == Some("true"),

            ledger_path: get_or(&get, "LEDGER_PATH", "complaints.csv"),

            translate_api_key: get("TRANSLATE_API_KEY").filter(|v| !v.is_empty()),
            chrome_bin: get("CHROME_BIN").filter(|v| !v.is_empty()),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// URL of the per-complaint detail record endpoint.
    pub fn detail_url(&self, portal_id: &str) -> String {
        format!("{}/api/complaint-record/{portal_id}", self.base_url)
    }

    /// URL of the resolution endpoint.
    pub fn resolve_url(&self) -> String {
        format!("{}/api/complaint-assign-process", self.base_url)
    }

    /// Check that required configuration is present and values are sensible.
    fn validate(&self) -> Result<(), OmbudError> {
        if self.username.is_empty() {
            return Err(OmbudError::Config("PORTAL_USERNAME is required".into()));
        }
        if self.password.is_empty() {
            return Err(OmbudError::Config("PORTAL_PASSWORD is required".into()));
        }
        if self.bot_token.is_empty() {
            return Err(OmbudError::Config("TELEGRAM_BOT_TOKEN is required".into()));
        }
        if self.max_pages < 1 {
            return Err(OmbudError::Config(format!(
                "MAX_PAGES must be at least 1, got {}",
                self.max_pages
            )));
        }
        if self.worker_pool_size < 1 {
            return Err(OmbudError::Config(format!(
                "WORKER_POOL_SIZE must be at least 1, got {}",
                self.worker_pool_size
            )));
        }
        if self.batch_size < 1 {
            return Err(OmbudError::Config(format!(
                "BATCH_SIZE must be at least 1, got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

fn get_or<F: Fn(&str) -> Option<String>>(get: &F, key: &str, default: &str) -> String {
    match get(key) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn get_u32<F: Fn(&str) -> Option<String>>(get: &F, key: &str, default: u32) -> u32 {
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_secs<F: Fn(&str) -> Option<String>>(get: &F, key: &str, default_secs: u64) -> Duration {
    let secs = get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}
