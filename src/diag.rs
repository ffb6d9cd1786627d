use crate::record::LogRecord;
use std::sync::Mutex;

/// Level of a local diagnostic emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Info,
    Warn,
    Error,
}

/// Local fallback sink for everything the reporter must say about
/// itself: delivery failures, reconnect attempts, config fallbacks,
/// and console-transport output.
///
/// This is an injected dependency rather than a hidden global so the
/// core stays testable; the default implementation is [`TracingDiag`].
/// Nothing written here ever goes back through the log transport, to
/// avoid recursion on delivery failures.
pub trait DiagnosticSink: Send + Sync {
    /// Emit a diagnostic message about the reporter itself.
    fn message(&self, level: DiagLevel, message: &str);

    /// Emit a full record locally (console transport output, or a
    /// record that failed delivery).
    fn record(&self, level: DiagLevel, record: &LogRecord);

    fn info(&self, message: &str) {
        self.message(DiagLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.message(DiagLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.message(DiagLevel::Error, message);
    }
}

/// Default sink that forwards diagnostics to the `tracing` macros.
#[derive(Clone, Default)]
pub struct TracingDiag;

impl DiagnosticSink for TracingDiag {
    fn message(&self, level: DiagLevel, message: &str) {
        match level {
            DiagLevel::Info => tracing::info!(target: "log_relay", "{message}"),
            DiagLevel::Warn => tracing::warn!(target: "log_relay", "{message}"),
            DiagLevel::Error => tracing::error!(target: "log_relay", "{message}"),
        }
    }

    fn record(&self, level: DiagLevel, record: &LogRecord) {
        let json = serde_json::to_string(record).unwrap_or_else(|_| "<unserializable>".to_string());
        match level {
            DiagLevel::Info => tracing::info!(target: "log_relay", record = %json),
            DiagLevel::Warn => tracing::warn!(target: "log_relay", record = %json),
            DiagLevel::Error => tracing::error!(target: "log_relay", record = %json),
        }
    }
}

/// A sink that remembers everything written to it.
///
/// Useful for unit tests that assert on routing, warning counts or
/// delivery-failure reporting without installing a tracing subscriber.
#[derive(Default)]
pub struct CaptureDiag {
    messages: Mutex<Vec<(DiagLevel, String)>>,
    records: Mutex<Vec<(DiagLevel, LogRecord)>>,
}

impl CaptureDiag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(DiagLevel, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<(DiagLevel, LogRecord)> {
        self.records.lock().unwrap().clone()
    }

    /// Number of captured messages at the given level.
    pub fn count_at(&self, level: DiagLevel) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl DiagnosticSink for CaptureDiag {
    fn message(&self, level: DiagLevel, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }

    fn record(&self, level: DiagLevel, record: &LogRecord) {
        self.records.lock().unwrap().push((level, record.clone()));
    }
}
