use crate::classify::{classify, ApiContext, HttpClientContext, SocketContext};
use crate::config::{ReporterConfig, TransportKind};
use crate::console::ConsoleTransport;
use crate::diag::{DiagnosticSink, TracingDiag};
use crate::dispatch::Dispatcher;
use crate::http::HttpTransport;
use crate::record::{build_record, ExtraFields, RecordContext, Severity};
use crate::transport::Transport;
use serde_json::Value;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Render an error and its source chain into one string.
fn error_chain(error: &dyn StdError) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Application-facing log reporter.
///
/// Construction never fails: an unrecognized transport string falls
/// back to the console transport with a single local warning. All
/// `report_*` operations are total; delivery failures are visible
/// only on the diagnostic sink. Must be constructed inside a tokio
/// runtime (the queue transport spawns its connection manager task).
pub struct Reporter {
    dispatcher: Dispatcher,
    ctx: RecordContext,
    kind: TransportKind,
}

impl Reporter {
    /// Build a reporter with the default `tracing`-backed diagnostic
    /// sink.
    pub fn new(config: ReporterConfig) -> Self {
        Self::with_diag(config, Arc::new(TracingDiag))
    }

    /// Build a reporter with an injected diagnostic sink.
    pub fn with_diag(config: ReporterConfig, diag: Arc<dyn DiagnosticSink>) -> Self {
        let kind = match TransportKind::parse(&config.transport) {
            Some(kind) => kind,
            None => {
                diag.warn(&format!(
                    "unrecognized transport '{}', falling back to console",
                    config.transport
                ));
                TransportKind::Console
            }
        };

        let (transport, kind): (Arc<dyn Transport>, TransportKind) = match kind {
            TransportKind::Http => (Arc::new(HttpTransport::new(config.http.clone())), kind),
            TransportKind::Amqp => {
                #[cfg(feature = "amqp")]
                {
                    let transport = crate::queue::QueueTransport::new(
                        Arc::new(crate::amqp::AmqpBroker),
                        config.queue.clone(),
                        Arc::clone(&diag),
                    );
                    (Arc::new(transport), kind)
                }

                #[cfg(not(feature = "amqp"))]
                {
                    diag.warn("amqp feature is not enabled, falling back to console");
                    (
                        Arc::new(ConsoleTransport::new(Arc::clone(&diag))),
                        TransportKind::Console,
                    )
                }
            }
            TransportKind::Console => (
                Arc::new(ConsoleTransport::new(Arc::clone(&diag))),
                kind,
            ),
        };

        Self::with_transport(transport, kind, &config, diag)
    }

    /// Build a reporter around an explicit transport implementation.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        kind: TransportKind,
        config: &ReporterConfig,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Self {
        // Only the HTTP path is bounded per call; console is synchronous
        // and the queue path relies on the broker.
        let call_timeout = (kind == TransportKind::Http)
            .then(|| Duration::from_millis(config.http.timeout_ms));

        Self {
            dispatcher: Dispatcher::new(transport, call_timeout, diag),
            ctx: RecordContext {
                host: config.host_name(),
                env: config.env.clone(),
                app_name: config.app_name.clone(),
            },
            kind,
        }
    }

    /// Resolved transport kind after normalization and fallbacks.
    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Give the transport a bounded chance to come up before traffic
    /// starts (default 500 ms). See [`Dispatcher::init`].
    pub async fn init(&self, timeout_ms: Option<u64>) {
        self.dispatcher.init(timeout_ms).await;
    }

    async fn send(&self, short: &str, full: &str, extra: Option<&ExtraFields>, severity: Severity) {
        let record = build_record(short, full, extra, severity, &self.ctx);
        self.dispatcher.dispatch(record).await;
    }

    /// Core reporting entry. Never fails; the default severity is
    /// `Alert`.
    pub async fn report(
        &self,
        short: &str,
        full: &str,
        extra: Option<ExtraFields>,
        severity: Option<Severity>,
    ) {
        self.send(short, full, extra.as_ref(), severity.unwrap_or(Severity::Alert))
            .await;
    }

    pub async fn report_info(&self, short: &str, full: &str, extra: Option<ExtraFields>) {
        self.send(short, full, extra.as_ref(), Severity::Informational)
            .await;
    }

    pub async fn report_general_error(&self, short: &str, full: &str, extra: Option<ExtraFields>) {
        self.send(short, full, extra.as_ref(), Severity::Error).await;
    }

    /// Report an unexpected error at `Alert` severity, stamping the
    /// call site into `error_file`/`error_line`.
    #[track_caller]
    pub fn report_unexpected_error(
        &self,
        error: &dyn StdError,
        extra: Option<ExtraFields>,
    ) -> impl Future<Output = ()> + '_ {
        let location = std::panic::Location::caller();
        let short = error.to_string();
        let full = error_chain(error);
        let mut extra = extra.unwrap_or_default();
        extra.insert("error_file".to_string(), Value::from(location.file()));
        extra.insert("error_line".to_string(), Value::from(location.line()));
        async move { self.send(&short, &full, Some(&extra), Severity::Alert).await }
    }

    pub async fn report_api_error(
        &self,
        error: &dyn StdError,
        api: &ApiContext,
        extra: Option<ExtraFields>,
    ) {
        let mut extra = extra.unwrap_or_default();
        api.apply(&mut extra);
        self.send(&error.to_string(), &error_chain(error), Some(&extra), Severity::Error)
            .await;
    }

    pub async fn report_api_info(
        &self,
        short: &str,
        full: &str,
        api: &ApiContext,
        extra: Option<ExtraFields>,
    ) {
        let mut extra = extra.unwrap_or_default();
        api.apply(&mut extra);
        self.send(short, full, Some(&extra), Severity::Informational)
            .await;
    }

    /// Report an unexpected API-surface error at `Alert` severity with
    /// request enrichment and the call site stamped in.
    #[track_caller]
    pub fn report_unexpected_api_error<'a>(
        &'a self,
        error: &dyn StdError,
        api: &ApiContext,
        extra: Option<ExtraFields>,
    ) -> impl Future<Output = ()> + 'a {
        let location = std::panic::Location::caller();
        let short = error.to_string();
        let full = error_chain(error);
        let mut extra = extra.unwrap_or_default();
        api.apply(&mut extra);
        extra.insert("error_file".to_string(), Value::from(location.file()));
        extra.insert("error_line".to_string(), Value::from(location.line()));
        async move { self.send(&short, &full, Some(&extra), Severity::Alert).await }
    }

    pub async fn report_socket_error(
        &self,
        error: &dyn StdError,
        socket: &SocketContext,
        extra: Option<ExtraFields>,
    ) {
        let mut extra = extra.unwrap_or_default();
        socket.apply(&mut extra);
        self.send(&error.to_string(), &error_chain(error), Some(&extra), Severity::Error)
            .await;
    }

    pub async fn report_socket_info(
        &self,
        short: &str,
        full: &str,
        socket: &SocketContext,
        extra: Option<ExtraFields>,
    ) {
        let mut extra = extra.unwrap_or_default();
        socket.apply(&mut extra);
        self.send(short, full, Some(&extra), Severity::Informational)
            .await;
    }

    /// Report a failed upstream HTTP call with response enrichment.
    pub async fn report_http_client_error(
        &self,
        error: &dyn StdError,
        upstream: &HttpClientContext,
        extra: Option<ExtraFields>,
    ) {
        let mut extra = extra.unwrap_or_default();
        upstream.apply(&mut extra);
        self.send(&error.to_string(), &error_chain(error), Some(&extra), Severity::Error)
            .await;
    }

    /// Classify a loose error-like value by its `kind` tag and report
    /// it with the matching enrichment. A malformed context degrades
    /// to two generic reports (the original value, then the
    /// classification failure) and never escapes this boundary.
    pub async fn error(&self, value: &Value, extra: Option<ExtraFields>) {
        match classify(value) {
            Ok(mut report) => {
                if let Some(extra) = extra {
                    report.extra.extend(extra);
                }
                self.send(&report.short, &report.full, Some(&report.extra), report.severity)
                    .await;
            }
            Err(err) => {
                let short = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unclassifiable error");
                let full = serde_json::to_string(value).unwrap_or_default();
                self.send(short, &full, extra.as_ref(), Severity::Alert).await;
                self.send(
                    "error classification failed",
                    &err.to_string(),
                    None,
                    Severity::Alert,
                )
                .await;
            }
        }
    }

    /// Shut the transport down, best-effort.
    pub async fn close(&self) {
        self.dispatcher.close().await;
    }
}
