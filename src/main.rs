//! xmpp-relay - XMPP notification relay
//!
//! Broadcasts webhook payloads to a fixed set of chat correspondents and
//! group rooms, and answers a few chat commands from those correspondents.

mod config;
mod error;
mod http;
mod metrics;
mod session;
mod telemetry;
mod transport;

use crate::config::Config;
use crate::http::AppState;
use crate::metrics::{Metrics, MetricsSource};
use crate::session::{Session, SessionContext};
use crate::transport::TransportError;
use crate::transport::gateway::GatewayConnector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path);

    // Initialize tracing
    let default_level = match &config {
        Ok(config) if config.debug => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();

    let config = config.map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;
    info!(
        user = %config.xmpp.user,
        listen = %config.listen,
        recipients = config.xmpp.send_notif.len(),
        rooms = config.xmpp.send_muc.len(),
        "Starting xmpp-relay"
    );

    let metrics = Arc::new(Metrics::new()?);
    let shutdown = CancellationToken::new();
    // Set before the session closes when the connection was lost for good.
    let fatal = Arc::new(AtomicBool::new(false));

    let ctx = SessionContext {
        metrics: Arc::clone(&metrics),
        snapshot: Arc::clone(&metrics) as Arc<dyn MetricsSource>,
        on_close: {
            let shutdown = shutdown.clone();
            Box::new(move || shutdown.cancel())
        },
        on_fatal: {
            let fatal = Arc::clone(&fatal);
            Box::new(move |e: &TransportError| {
                error!(error = %e, "Connection lost, exiting");
                fatal.store(true, Ordering::SeqCst);
            })
        },
    };
    let session = Session::connect(&GatewayConnector, &config, ctx)
        .await
        .map_err(|e| {
            error!(error = %e, code = e.error_code(), "Failed to start the XMPP session");
            e
        })?;
    info!(jid = %session.jid(), listen = %config.listen, "Session ready");

    // Ctrl-C closes the session, which in turn stops the HTTP server.
    {
        let session = session.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    session.close().await;
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    let state = AppState {
        session: session.clone(),
        metrics,
    };
    let served = http::run_http_server(config.listen.clone(), state, shutdown).await;

    session.close().await;
    if let Err(e) = served {
        error!(addr = %config.listen, error = %e, "HTTP server failed");
        return Err(e.into());
    }
    if fatal.load(Ordering::SeqCst) {
        anyhow::bail!("connection to the gateway lost");
    }
    info!("Shutdown complete");
    Ok(())
}
