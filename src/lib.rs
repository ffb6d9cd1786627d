pub mod record;
pub mod config;
pub mod diag;
pub mod transport;
pub mod console;
pub mod http;
pub mod queue;

#[cfg(feature = "amqp")]
pub mod amqp;

pub mod dispatch;
pub mod classify;
pub mod reporter;

pub use classify::{ApiContext, HttpClientContext, SocketContext};
pub use config::{ReporterConfig, TransportKind};
pub use diag::{CaptureDiag, DiagLevel, DiagnosticSink, TracingDiag};
pub use record::{ExtraFields, LogRecord, Severity};
pub use reporter::Reporter;
pub use transport::{Transport, TransportError};
