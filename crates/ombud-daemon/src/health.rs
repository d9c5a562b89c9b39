//! Health monitoring and the `/health` HTTP endpoint.
//!
//! A live process always reports `"healthy"`; diagnosis happens through
//! the last-fetch fields, which the supervisor updates after every cycle.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use ombud_types::OmbudError;

/// Payload returned by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime: String,
    pub last_fetch_time: String,
    pub last_fetch_status: String,
}

#[derive(Debug)]
struct FetchState {
    last_fetch_time: Option<DateTime<Local>>,
    last_fetch_status: String,
}

/// Tracks uptime and the outcome of the most recent fetch cycle.
pub struct Monitor {
    started: Instant,
    state: RwLock<FetchState>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: RwLock::new(FetchState {
                last_fetch_time: None,
                last_fetch_status: "not started".to_string(),
            }),
        }
    }

    /// Record the outcome of a fetch cycle (`"success"` or an error text).
    pub fn update_fetch_status(&self, status: impl Into<String>) {
        let mut state = self.state.write().unwrap();
        state.last_fetch_time = Some(Local::now());
        state.last_fetch_status = status.into();
    }

    /// Current health snapshot.
    pub fn status(&self) -> HealthStatus {
        let state = self.state.read().unwrap();
        HealthStatus {
            status: "healthy".to_string(),
            uptime: format_uptime(self.started.elapsed()),
            last_fetch_time: state
                .last_fetch_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            last_fetch_status: state.last_fetch_status.clone(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `GET /health` until the shutdown signal fires.
pub async fn serve(
    monitor: Arc<Monitor>,
    port: u16,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), OmbudError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(monitor);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OmbudError::Config(format!("cannot bind health port {port}: {e}")))?;

    info!(%addr, "health check server started");

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&stop| stop).await;
        })
        .await
        .map_err(|e| OmbudError::Config(format!("health server error: {e}")))
}

async fn health_handler(State(monitor): State<Arc<Monitor>>) -> Json<HealthStatus> {
    Json(monitor.status())
}

/// Compact `1h2m3s`-style rendering of the process uptime.
fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
