//! Prometheus metrics for the relay.
//!
//! All metrics live in an explicit [`Metrics`] handle that owns its own
//! registry. The session registers its connection info gauge on that handle
//! at construction and removes it again when it closes.
//!
//! - `xmpp_send_trigger_total` - successful calls to `POST /send`
//! - `xmpp_messages_sent_total{recipient,type,format}` - delivery attempts
//! - `xmpp_delivery_errors_total{recipient}` - failed delivery attempts
//! - `xmpp_messages_received_total{sender}` - inbound commands
//! - `xmpp_command_duration_seconds{command}` - command handling latency
//! - `xmpp_info{encrypted,jid}` - constant 1 while a session is open

use prometheus::proto::{Metric, MetricType};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::fmt;
use thiserror::Error;

use crate::session::{ChatType, Format};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to gather metrics: {0}")]
    Gather(String),
}

/// One human-readable metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    pub kind: String,
    pub name: String,
    /// Rendered `name="value"` pairs joined by `,`.
    pub labels: String,
    pub value: f64,
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{{{}}}: {:.6}", self.kind, self.name, self.labels, self.value)
    }
}

/// Source of the metric snapshot served by the `metrics` chat command.
pub trait MetricsSource: Send + Sync {
    fn snapshot(&self) -> Result<Vec<MetricLine>, MetricsError>;
}

/// Connection info gauge registered by a live session.
#[derive(Clone)]
pub struct SessionInfo {
    gauge: IntGauge,
}

pub struct Metrics {
    registry: Registry,
    send_triggered: IntCounter,
    messages_sent: IntCounterVec,
    delivery_errors: IntCounterVec,
    messages_received: IntCounterVec,
    command_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        macro_rules! register {
            ($init:expr) => {{
                let m = $init?;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        let send_triggered = register!(IntCounter::new(
            "xmpp_send_trigger_total",
            "Number of successful calls to the /send webhook."
        ));
        let messages_sent = register!(IntCounterVec::new(
            Opts::new("xmpp_messages_sent_total", "Number of messages sent."),
            &["recipient", "type", "format"]
        ));
        let delivery_errors = register!(IntCounterVec::new(
            Opts::new("xmpp_delivery_errors_total", "Number of failed message deliveries."),
            &["recipient"]
        ));
        let messages_received = register!(IntCounterVec::new(
            Opts::new("xmpp_messages_received_total", "Number of messages received."),
            &["sender"]
        ));
        let command_latency = register!(HistogramVec::new(
            HistogramOpts::new("xmpp_command_duration_seconds", "Chat command latency by command")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["command"]
        ));

        Ok(Self {
            registry,
            send_triggered,
            messages_sent,
            delivery_errors,
            messages_received,
            command_latency,
        })
    }

    #[inline]
    pub fn record_send_trigger(&self) {
        self.send_triggered.inc();
    }

    #[inline]
    pub fn record_sent(&self, recipient: &str, chat_type: ChatType, format: Format) {
        self.messages_sent
            .with_label_values(&[recipient, chat_type.as_str(), format.as_str()])
            .inc();
    }

    #[inline]
    pub fn record_delivery_error(&self, recipient: &str) {
        self.delivery_errors.with_label_values(&[recipient]).inc();
    }

    #[inline]
    pub fn record_received(&self, sender: &str) {
        self.messages_received.with_label_values(&[sender]).inc();
    }

    #[inline]
    pub fn record_command(&self, command: &str, duration_secs: f64) {
        self.command_latency
            .with_label_values(&[command])
            .observe(duration_secs);
    }

    /// Register the constant `xmpp_info` gauge for a connected session.
    pub fn register_session(&self, jid: &str, encrypted: bool) -> Result<SessionInfo, prometheus::Error> {
        let gauge = IntGauge::with_opts(
            Opts::new(
                "xmpp_info",
                "constant metric with value=1. Various information about the XMPP connection.",
            )
            .const_label("encrypted", encrypted.to_string())
            .const_label("jid", jid),
        )?;
        gauge.set(1);
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(SessionInfo { gauge })
    }

    pub fn unregister_session(&self, info: &SessionInfo) {
        if let Err(e) = self.registry.unregister(Box::new(info.gauge.clone())) {
            tracing::warn!(error = %e, "Failed to unregister session metrics");
        }
    }

    /// Gather all metrics and encode them in Prometheus text format.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return String::new();
        }
        match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
                String::new()
            }
        }
    }
}

fn sample(kind: MetricType, metric: &Metric) -> (&'static str, f64) {
    match kind {
        MetricType::COUNTER => ("counter", metric.get_counter().get_value()),
        MetricType::GAUGE => ("gauge", metric.get_gauge().get_value()),
        MetricType::UNTYPED => ("untyped", metric.get_untyped().get_value()),
        MetricType::SUMMARY => {
            let summary = metric.get_summary();
            ("summary", summary.get_sample_sum() / summary.get_sample_count() as f64)
        }
        MetricType::HISTOGRAM => {
            let histogram = metric.get_histogram();
            (
                "histogram",
                histogram.get_sample_sum() / histogram.get_sample_count() as f64,
            )
        }
    }
}

impl MetricsSource for Metrics {
    fn snapshot(&self) -> Result<Vec<MetricLine>, MetricsError> {
        let mut lines = Vec::new();
        for family in self.registry.gather() {
            for metric in family.get_metric() {
                let labels = metric
                    .get_label()
                    .iter()
                    .map(|label| format!("{}=\"{}\"", label.get_name(), label.get_value()))
                    .collect::<Vec<_>>()
                    .join(",");
                let (kind, value) = sample(family.get_field_type(), metric);
                lines.push(MetricLine {
                    kind: kind.to_string(),
                    name: family.get_name().to_string(),
                    labels,
                    value,
                });
            }
        }
        Ok(lines)
    }
}
