use crate::diag::{DiagLevel, DiagnosticSink};
use crate::record::LogRecord;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Default bound on [`Dispatcher::init`].
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 500;

/// Routes each built [`LogRecord`] to exactly one transport.
///
/// Delivery is best-effort: any failure (timeout, network error,
/// broker rejection) is written to the diagnostic sink together with
/// the record, and the call completes normally. Application logic is
/// never blocked or faulted by a logging failure.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    /// Per-call bound on the transport, set for the HTTP kind. The
    /// queue path is unbounded by design and relies on the broker.
    call_timeout: Option<Duration>,
    diag: Arc<dyn DiagnosticSink>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        call_timeout: Option<Duration>,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            transport,
            call_timeout,
            diag,
        }
    }

    /// Let the transport bring itself up (the queue transport's first
    /// broker connect), bounded by `timeout_ms` (default 500). Timing
    /// out is reported locally and the call resolves anyway: the
    /// connection manager keeps retrying in the background and
    /// dispatch degrades to best-effort until it succeeds.
    pub async fn init(&self, timeout_ms: Option<u64>) {
        let bound = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_INIT_TIMEOUT_MS));
        match timeout(bound, self.transport.open()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.diag.error(&format!("transport init failed: {err}")),
            Err(_) => self.diag.warn(&format!(
                "transport not ready after {bound:?}; continuing, delivery is best-effort"
            )),
        }
    }

    /// Send one record through the transport. Never fails.
    pub async fn dispatch(&self, record: LogRecord) {
        let result = match self.call_timeout {
            Some(bound) => match timeout(bound, self.transport.send(&record)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            },
            None => self.transport.send(&record).await,
        };

        if let Err(err) = result {
            self.diag.error(&format!("log delivery failed: {err}"));
            self.diag.record(DiagLevel::Error, &record);
        }
    }

    /// Shut the transport down, best-effort.
    pub async fn close(&self) {
        self.transport.shutdown().await;
    }
}
