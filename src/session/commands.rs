//! Chat command interpreter for allow-listed correspondents.

use tracing::{Instrument, info, warn};

use super::Session;
use crate::metrics::MetricsSource;
use crate::telemetry::{CommandTimer, spans};

pub const HELP_MESSAGE: &str = "Help:
 - help
 - metrics
 - ping
 - quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Help,
    Metrics,
    Ping,
    Quit,
    Unknown,
}

impl Command {
    /// Match trimmed, case-folded input.
    pub(super) fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "help" => Self::Help,
            "metrics" => Self::Metrics,
            "ping" => Self::Ping,
            "quit" => Self::Quit,
            _ => Self::Unknown,
        }
    }

    pub(super) fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Metrics => "metrics",
            Self::Ping => "ping",
            Self::Quit => "quit",
            Self::Unknown => "unknown",
        }
    }
}

/// Replies for a command, one chat message per entry. `raw` is the input
/// as received and is echoed back for unknown commands.
pub(super) fn replies(command: Command, raw: &str, source: &dyn MetricsSource) -> Vec<String> {
    match command {
        Command::Help => vec![HELP_MESSAGE.to_string()],
        Command::Ping => vec!["pong".to_string()],
        Command::Metrics => match source.snapshot() {
            Ok(lines) => lines.iter().map(ToString::to_string).collect(),
            Err(e) => vec![format!("Could not fetch the metrics: {e}")],
        },
        Command::Unknown => vec![format!("Unknown command: {raw}\n{HELP_MESSAGE}")],
        Command::Quit => Vec::new(),
    }
}

impl Session {
    /// Execute a command from an already authorized sender and queue the replies.
    pub(super) async fn handle_command(&self, sender: &str, text: &str) {
        self.inner.metrics.record_received(sender);
        let command = Command::parse(text);

        async {
            let _timer = CommandTimer::new(&self.inner.metrics, command.name());
            if command == Command::Quit {
                info!("Quit requested");
                self.close().await;
                return;
            }
            for reply in replies(command, text, self.inner.snapshot.as_ref()) {
                if let Err(e) = self.send_to(sender, reply).await {
                    warn!(error = %e, "Could not queue reply");
                    break;
                }
            }
        }
        .instrument(spans::command(command.name(), sender))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricLine, MetricsError};

    struct FixedSnapshot(Vec<MetricLine>);

    impl MetricsSource for FixedSnapshot {
        fn snapshot(&self) -> Result<Vec<MetricLine>, MetricsError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSnapshot;

    impl MetricsSource for BrokenSnapshot {
        fn snapshot(&self) -> Result<Vec<MetricLine>, MetricsError> {
            Err(MetricsError::Gather("registry poisoned".to_string()))
        }
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(Command::parse("ping"), Command::Ping);
        assert_eq!(Command::parse("  PING\n"), Command::Ping);
        assert_eq!(Command::parse("Metrics"), Command::Metrics);
        assert_eq!(Command::parse("\thelp "), Command::Help);
        assert_eq!(Command::parse("QUIT"), Command::Quit);
        assert_eq!(Command::parse("ping please"), Command::Unknown);
        assert_eq!(Command::parse(""), Command::Unknown);
    }

    #[test]
    fn test_unknown_echoes_raw_input() {
        let out = replies(Command::Unknown, " Reboot now", &FixedSnapshot(vec![]));
        assert_eq!(out, vec![format!("Unknown command:  Reboot now\n{HELP_MESSAGE}")]);
    }

    #[test]
    fn test_metrics_one_reply_per_line() {
        let source = FixedSnapshot(vec![
            MetricLine {
                kind: "counter".into(),
                name: "x_total".into(),
                labels: String::new(),
                value: 3.0,
            },
            MetricLine {
                kind: "gauge".into(),
                name: "y".into(),
                labels: "a=\"b\"".into(),
                value: 0.5,
            },
        ]);
        assert_eq!(
            replies(Command::Metrics, "metrics", &source),
            vec!["counter x_total{}: 3.000000", "gauge y{a=\"b\"}: 0.500000"]
        );
    }

    #[test]
    fn test_metrics_failure_is_reported() {
        assert_eq!(
            replies(Command::Metrics, "metrics", &BrokenSnapshot),
            vec!["Could not fetch the metrics: failed to gather metrics: registry poisoned"]
        );
    }

    #[test]
    fn test_quit_has_no_reply() {
        assert!(replies(Command::Quit, "quit", &BrokenSnapshot).is_empty());
    }
}
