use crate::diag::{DiagLevel, DiagnosticSink};
use crate::record::{LogRecord, Severity};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;

/// Transport that writes records to the local diagnostic sink instead
/// of the network. Informational records go to the info level, every
/// other severity to the error level. Never fails.
pub struct ConsoleTransport {
    diag: Arc<dyn DiagnosticSink>,
}

impl ConsoleTransport {
    pub fn new(diag: Arc<dyn DiagnosticSink>) -> Self {
        Self { diag }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, record: &LogRecord) -> Result<(), TransportError> {
        let level = if record.level == Severity::Informational.as_level() {
            DiagLevel::Info
        } else {
            DiagLevel::Error
        };
        self.diag.record(level, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CaptureDiag;
    use crate::record::{build_record, RecordContext};

    fn ctx() -> RecordContext {
        RecordContext {
            host: "h".into(),
            env: "test".into(),
            app_name: "a".into(),
        }
    }

    #[tokio::test]
    async fn informational_goes_to_info_all_others_to_error() {
        let diag = Arc::new(CaptureDiag::new());
        let transport = ConsoleTransport::new(diag.clone());

        let severities = [
            Severity::Emergency,
            Severity::Alert,
            Severity::Critical,
            Severity::Error,
            Severity::Warning,
            Severity::Notice,
            Severity::Informational,
            Severity::Debug,
        ];
        for severity in severities {
            let record = build_record("m", "f", None, severity, &ctx());
            transport.send(&record).await.unwrap();
        }

        let records = diag.records();
        assert_eq!(records.len(), 8);
        for (level, record) in records {
            if record.level == 6 {
                assert_eq!(level, DiagLevel::Info);
            } else {
                assert_eq!(level, DiagLevel::Error);
            }
        }
    }

    #[tokio::test]
    async fn routed_record_keeps_its_contents() {
        let diag = Arc::new(CaptureDiag::new());
        let transport = ConsoleTransport::new(diag.clone());

        let mut extra = crate::record::ExtraFields::new();
        extra.insert("component".to_string(), serde_json::json!("writer"));
        let record = build_record("Disk full", "stack...", Some(&extra), Severity::Error, &ctx());
        transport.send(&record).await.unwrap();

        let records = diag.records();
        let (level, routed) = &records[0];
        assert_eq!(*level, DiagLevel::Error);
        assert_eq!(routed.short_message, "Disk full");
        assert_eq!(routed.level, 3);
        assert_eq!(
            routed.additional.get("_component"),
            Some(&serde_json::json!("writer"))
        );
    }
}
