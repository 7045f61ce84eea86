//! Bounded error telemetry buffer.
//!
//! Handler failures are mapped to [`ErrorReport`]s and offered to a bounded
//! channel owned by the composition root. Producers never wait: a full buffer
//! drops the report.

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::resources::sha256_hex;

/// One entry of an error's source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorFrame {
    /// Frame text, or its SHA-256 when the frame may not be reported in clear
    pub text: String,
    /// Whether `text` is the clear frame
    pub in_clear: bool,
}

/// Telemetry record of a failed handler.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Component that raised the error
    pub source: String,
    /// Top-level error message
    pub message: String,
    /// Rust type of the error
    pub error_type: &'static str,
    /// Source chain, outermost first, excluding the top-level message
    pub frames: Vec<ErrorFrame>,
    /// When the report was built
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    /// Builds a report from `error` raised by `source`.
    pub fn from_error<E>(source: &str, error: &E) -> Self
    where
        E: StdError + 'static,
    {
        let mut frames = Vec::new();
        let mut cause = error.source();
        while let Some(inner) = cause {
            frames.push(map_frame(inner.to_string()));
            cause = inner.source();
        }

        Self {
            source: source.to_string(),
            message: error.to_string(),
            error_type: std::any::type_name::<E>(),
            frames,
            occurred_at: Utc::now(),
        }
    }
}

/// Whether a frame may be reported without hashing.
///
/// Every frame is currently reported in clear; no redaction policy exists.
pub fn is_frame_reportable(_frame: &str) -> bool {
    true
}

fn map_frame(text: String) -> ErrorFrame {
    if is_frame_reportable(&text) {
        ErrorFrame { text, in_clear: true }
    } else {
        ErrorFrame {
            text: sha256_hex(text.as_bytes()),
            in_clear: false,
        }
    }
}

/// Producer side of the telemetry buffer.
#[derive(Debug, Clone)]
pub struct TelemetrySender {
    tx: mpsc::Sender<ErrorReport>,
}

impl TelemetrySender {
    /// Offers `report` without waiting. Returns whether it was buffered.
    pub fn report(&self, report: ErrorReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(report)) => {
                debug!("Telemetry buffer full, dropping report from {}", report.source);
                false
            }
            Err(TrySendError::Closed(report)) => {
                debug!("Telemetry buffer closed, dropping report from {}", report.source);
                false
            }
        }
    }

    /// Maps `error` to a report and offers it.
    pub fn report_error<E>(&self, source: &str, error: &E) -> bool
    where
        E: StdError + 'static,
    {
        self.report(ErrorReport::from_error(source, error))
    }
}

/// Consumer side of the telemetry buffer.
#[derive(Debug)]
pub struct TelemetryReceiver {
    rx: mpsc::Receiver<ErrorReport>,
}

impl TelemetryReceiver {
    /// Next buffered report, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ErrorReport> {
        self.rx.recv().await
    }

    /// Logs reports until every sender is dropped.
    pub async fn drain(mut self) {
        while let Some(report) = self.rx.recv().await {
            let frames: Vec<&str> = report.frames.iter().map(|f| f.text.as_str()).collect();
            warn!(
                source = %report.source,
                error_type = report.error_type,
                occurred_at = %report.occurred_at.to_rfc3339(),
                frames = ?frames,
                "Handler error: {}",
                report.message
            );
        }
        debug!("Telemetry drain stopped");
    }
}

/// Creates the telemetry buffer holding at most `capacity` reports.
pub fn telemetry_channel(capacity: usize) -> (TelemetrySender, TelemetryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TelemetrySender { tx }, TelemetryReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[derive(Debug, thiserror::Error)]
    #[error("reconcile failed")]
    struct Outer {
        #[source]
        inner: CoreError,
    }

    #[test]
    fn test_report_walks_source_chain_in_clear() {
        let error = Outer {
            inner: CoreError::Write("connection refused".to_string()),
        };
        let report = ErrorReport::from_error("reconciler", &error);

        assert_eq!(report.message, "reconcile failed");
        assert!(report.error_type.ends_with("Outer"));
        assert_eq!(report.frames.len(), 1);
        assert!(report.frames[0].in_clear);
        assert_eq!(report.frames[0].text, "Cluster write failed: connection refused");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_reports() {
        let (sender, mut receiver) = telemetry_channel(1);
        let error = CoreError::NotFound("x".to_string());

        assert!(sender.report_error("a", &error));
        assert!(!sender.report_error("b", &error));

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.source, "a");

        drop(sender);
        assert!(receiver.recv().await.is_none());
    }
}
