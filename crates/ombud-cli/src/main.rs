//! ombud -- supervisor for a complaint-management portal.
//!
//! Watches the portal's dashboard, announces new complaints to a chat
//! channel, and lets operators resolve them back on the portal from the
//! chat. Runs unattended until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ombud_browser::{PortalSession, SessionHandle};
use ombud_channel::{poll_loop, Notifier, TelegramApi};
use ombud_daemon::{health, Monitor, ResolutionEngine, Supervisor};
use ombud_ledger::Ledger;
use ombud_types::Config;

/// ombud -- complaint-portal supervisor.
#[derive(Parser, Debug)]
#[command(name = "ombud", version, about)]
struct Cli {
    /// Increase logging verbosity (same as RUST_LOG=debug)
    #[arg(long, short)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("starting ombud");

    let cfg = Arc::new(Config::from_env().context("configuration error")?);
    info!(
        username = %cfg.username,
        max_pages = cfg.max_pages,
        workers = cfg.worker_pool_size,
        "configuration loaded"
    );
    if cfg.debug_mode {
        warn!("debug mode enabled: outbound chat and portal mutations are simulated");
    }
    match &cfg.translate_api_key {
        Some(_) => info!("translation service key present (handled by the external translator)"),
        None => info!("no translation key configured, translation disabled"),
    }

    let ledger =
        Arc::new(Ledger::open(&cfg.ledger_path).context("failed to open complaint ledger")?);

    let api = Arc::new(TelegramApi::new(&cfg.bot_token));
    let notifier = Arc::new(Notifier::new(Arc::clone(&api), cfg.chat_id, cfg.debug_mode));

    let monitor = Arc::new(Monitor::new());

    // One watch channel fans the shutdown signal out to every task.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let health_task = {
        let monitor = Arc::clone(&monitor);
        let port = cfg.health_port;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(monitor, port, shutdown).await {
                warn!(error = %e, "health check server failed");
            }
        })
    };

    info!("launching browser session");
    let session = PortalSession::launch(cfg.chrome_bin.as_deref())
        .await
        .context("failed to launch browser")?;
    let sessions = Arc::new(SessionHandle::new(session));

    // Inbound chat: poller feeds the resolution engine.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
    let poller_task = tokio::spawn(poll_loop(
        Arc::clone(&api),
        cfg.chat_id,
        event_tx,
        shutdown_rx.clone(),
    ));

    let engine = Arc::new(ResolutionEngine::new(
        Arc::clone(&ledger),
        Arc::clone(&notifier),
        Arc::clone(&sessions),
        Arc::clone(&cfg),
    ));
    let engine_task = {
        let engine = Arc::clone(&engine);
        let cancel = shutdown_rx.clone();
        tokio::spawn(async move { engine.run(event_rx, cancel).await })
    };

    // Translate OS signals into the shared shutdown watch.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    let supervisor = Supervisor::new(
        Arc::clone(&cfg),
        Arc::clone(&ledger),
        Arc::clone(&notifier),
        Arc::clone(&sessions),
        Arc::clone(&monitor),
    );

    let result = supervisor.run(shutdown_rx).await;

    // Stop the background tasks and tear the browser down.
    let _ = shutdown_tx.send(true);
    sessions.dispose().await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = engine_task.await;
        let _ = health_task.await;
    })
    .await;

    info!("ombud stopped");
    result.map_err(Into::into)
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler, relying on ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
