//! HTTP server: the `/send` webhook and the Prometheus `/metrics` endpoint.
//!
//! Listens on TCP or on a Unix domain socket and runs until the shutdown
//! token fires, which happens when the session closes for any reason.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;

use crate::config::ListenAddr;
use crate::error::SessionError;
use crate::metrics::Metrics;
use crate::session::{Format, Session};

#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    pub metrics: Arc<Metrics>,
}

/// Render format for a request body, from its `Content-Type` media type.
fn format_for(headers: &HeaderMap) -> Format {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match media_type.as_str() {
        "text/plain" => Format::Text,
        "text/html" | "application/xhtml+xml" | "application/xml" | "text/xml" => Format::Html,
        _ => {
            tracing::error!(content_type = %content_type, "Unsupported content type, sending as text");
            Format::Text
        }
    }
}

/// Handler for POST /send - broadcasts the body through the session.
async fn send_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let format = format_for(&headers);
    let text = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting non UTF-8 body");
            return (StatusCode::BAD_REQUEST, "body must be UTF-8\n");
        }
    };

    match state.session.send(text, format).await {
        Ok(()) => {
            state.metrics.record_send_trigger();
            (StatusCode::OK, "")
        }
        Err(SessionError::Closed) => (StatusCode::SERVICE_UNAVAILABLE, "session closed\n"),
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Send failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "send failed\n")
        }
    }
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.gather_text()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
///
/// A Unix socket file left by an earlier run is replaced, and the socket
/// is removed again once the server stops.
pub async fn run_http_server(
    listen: ListenAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    let stopped = async move { shutdown.cancelled().await };
    match listen {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await?;
        }
        ListenAddr::Unix(path) => {
            remove_socket(&path)?;
            let listener = UnixListener::bind(&path)?;
            tracing::info!(path = %path.display(), "HTTP server listening");
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await;
            if let Err(e) = remove_socket(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket");
            }
            served?;
        }
    }
    tracing::info!("HTTP server stopped");
    Ok(())
}

fn remove_socket(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
