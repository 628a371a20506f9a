//! Telemetry utilities for command timing and session spans.

use std::sync::Arc;
use std::time::Instant;

use crate::metrics::Metrics;

/// Guard for timing command execution and recording metrics.
///
/// Records command latency when dropped.
pub struct CommandTimer {
    metrics: Arc<Metrics>,
    command: &'static str,
    start: Instant,
}

impl CommandTimer {
    /// Start timing a command.
    pub fn new(metrics: &Arc<Metrics>, command: &'static str) -> Self {
        Self {
            metrics: Arc::clone(metrics),
            command,
            start: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metrics.record_command(self.command, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span wrapping a session's background loops.
    pub fn session(jid: &str, task: &'static str) -> Span {
        info_span!("session", jid = %jid, task = task)
    }

    /// Span for handling one inbound command.
    pub fn command(name: &str, sender: &str) -> Span {
        info_span!("command", name = %name, sender = %sender)
    }
}
