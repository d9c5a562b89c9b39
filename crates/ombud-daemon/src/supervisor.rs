//! Top-level supervisory loop.
//!
//! Startup: login with retry, one initial fetch cycle, then a periodic
//! ticker. Every cycle runs fetch-with-retry; recovery escalates in
//! order: plain retry → re-authenticate → rebuild the browser session →
//! critical alert to the chat channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use ombud_browser::{PortalSession, SessionHandle};
use ombud_channel::Notifier;
use ombud_ledger::Ledger;
use ombud_portal::{login, Scraper};
use ombud_types::{Config, OmbudError};

use crate::health::Monitor;

/// Pause before retrying after a generic (non-session) fetch error.
const GENERIC_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Pause after login for the portal's post-login redirect to land.
const POST_LOGIN_SETTLE: Duration = Duration::from_secs(2);

/// Orchestrates fetch cycles and the fail-over ladder.
pub struct Supervisor {
    cfg: Arc<Config>,
    ledger: Arc<Ledger>,
    notifier: Arc<Notifier>,
    sessions: Arc<SessionHandle>,
    monitor: Arc<Monitor>,
}

impl Supervisor {
    pub fn new(
        cfg: Arc<Config>,
        ledger: Arc<Ledger>,
        notifier: Arc<Notifier>,
        sessions: Arc<SessionHandle>,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            cfg,
            ledger,
            notifier,
            sessions,
            monitor,
        }
    }

    /// Run until the shutdown signal fires.
    ///
    /// Startup failures (login retries exhausted, initial fetch failed)
    /// propagate out so the process exits visibly instead of idling in a
    /// broken state.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OmbudError> {
        self.login_with_retry().await?;
        tokio::time::sleep(POST_LOGIN_SETTLE).await;

        info!("running initial fetch");
        match self.fetch_cycle().await {
            Ok(()) => self.monitor.update_fetch_status("success"),
            Err(e) => {
                self.monitor.update_fetch_status(format!("error: {e}"));
                return Err(e);
            }
        }

        info!(interval = ?self.cfg.fetch_interval, "initial fetch complete, entering refresh loop");

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.cfg.fetch_interval,
            self.cfg.fetch_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, leaving refresh loop");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    info!("refreshing complaint list");
                    if let Err(e) = self.fetch_with_retry().await {
                        warn!(error = %e, "cycle failed after all retry attempts");
                    }
                }
            }
        }
    }

    /// Initial login, bounded by `max_login_retries` with a fixed delay.
    async fn login_with_retry(&self) -> Result<(), OmbudError> {
        let mut last_err = None;
        for attempt in 1..=self.cfg.max_login_retries {
            info!(attempt, max = self.cfg.max_login_retries, "logging in to portal");
            let session = self.sessions.current().await;
            match self.login_on(&session).await {
                Ok(()) => {
                    info!("login successful");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "login attempt failed");
                    last_err = Some(e);
                    if attempt < self.cfg.max_login_retries {
                        tokio::time::sleep(self.cfg.login_retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| OmbudError::Login("no login attempts made".into())))
    }

    async fn login_on(&self, session: &PortalSession) -> Result<(), OmbudError> {
        login::login(
            session,
            &self.cfg.login_url,
            &self.cfg.username,
            &self.cfg.password,
            self.cfg.wait_timeout,
        )
        .await
    }

    /// One scrape plus the resolved-elsewhere sweep.
    async fn fetch_cycle(&self) -> Result<(), OmbudError> {
        let session = self.sessions.current().await;
        let scraper = Scraper::new(
            session,
            Arc::clone(&self.ledger),
            Arc::clone(&self.notifier),
            Arc::clone(&self.cfg),
        );
        let observed = scraper.fetch_all().await?;
        self.sweep_resolved_elsewhere(&observed).await;
        Ok(())
    }

    /// The fail-over ladder. Exhausting every attempt raises a critical
    /// alert and records the failure; the next tick starts fresh.
    pub async fn fetch_with_retry(&self) -> Result<(), OmbudError> {
        let mut last_err: Option<OmbudError> = None;

        for attempt in 0..=self.cfg.max_fetch_retries {
            if attempt > 0 {
                info!(attempt, max = self.cfg.max_fetch_retries, "retrying fetch");
            }

            let result = tokio::time::timeout(self.cfg.fetch_timeout, self.fetch_cycle()).await;
            let err = match result {
                Ok(Ok(())) => {
                    self.monitor.update_fetch_status("success");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => OmbudError::Fetch(format!(
                    "fetch timed out after {:?}",
                    self.cfg.fetch_timeout
                )),
            };

            warn!(attempt, error = %err, "fetch attempt failed");

            if err.is_session_expired() {
                // Rung two: re-authenticate on the live session.
                info!("session expired, attempting re-login");
                let session = self.sessions.current().await;
                if self.login_on(&session).await.is_ok() {
                    info!("re-login successful");
                    last_err = Some(err);
                    continue;
                }

                // Rung three: rebuild the browser session and log in again.
                warn!("re-login failed, rebuilding browser session");
                match PortalSession::launch(self.cfg.chrome_bin.as_deref()).await {
                    Ok(fresh) => {
                        self.sessions.replace(fresh).await;
                        let session = self.sessions.current().await;
                        match self.login_on(&session).await {
                            Ok(()) => info!("login successful after browser rebuild"),
                            Err(e) => warn!(error = %e, "login still failing after rebuild"),
                        }
                    }
                    Err(e) => error!(error = %e, "browser rebuild failed"),
                }
            } else {
                tokio::time::sleep(GENERIC_RETRY_DELAY).await;
            }

            last_err = Some(err);
        }

        // Rung four: every attempt exhausted.
        let last_err =
            last_err.unwrap_or_else(|| OmbudError::Fetch("no fetch attempts made".into()));
        error!(error = %last_err, "all fetch attempts failed");
        self.monitor.update_fetch_status(format!("error: {last_err}"));

        if let Err(e) = self
            .notifier
            .send_critical_alert(
                "Fetch/Login Failure",
                &format!(
                    "Unable to fetch complaints after {} attempts. Last error: {last_err}",
                    self.cfg.max_fetch_retries
                ),
                self.cfg.max_fetch_retries,
            )
            .await
        {
            warn!(error = %e, "failed to send critical alert");
        }

        Err(OmbudError::Fetch(format!(
            "all {} retry attempts failed: {last_err}",
            self.cfg.max_fetch_retries
        )))
    }

    /// Reconcile the ledger against what the scrape actually saw.
    ///
    /// Anything the ledger knows that the portal no longer lists was
    /// resolved out-of-band; its notification is edited to RESOLVED and
    /// the entry removed. Removal happens only after a successful edit so
    /// a chat outage leaves the entry for the next cycle.
    pub async fn sweep_resolved_elsewhere(&self, observed: &[String]) {
        let observed: HashSet<&str> = observed.iter().map(String::as_str).collect();
        let mut resolved = 0usize;

        for display_id in self.ledger.all_known() {
            if observed.contains(display_id.as_str()) {
                continue;
            }

            info!(display_id = %display_id, "complaint gone from portal, marking resolved");
            let name = self.ledger.cached_name(&display_id);
            let message_id = self.ledger.message_id(&display_id);

            if let Err(e) = self
                .notifier
                .edit_resolved(&message_id, &display_id, &name)
                .await
            {
                warn!(display_id = %display_id, error = %e, "failed to edit message, keeping entry");
                continue;
            }

            match self.ledger.remove(&display_id) {
                Ok(()) => resolved += 1,
                Err(e) => warn!(display_id = %display_id, error = %e, "failed to remove ledger entry"),
            }
        }

        if resolved > 0 {
            info!(count = resolved, "complaints marked resolved out-of-band");
        }
    }
}
