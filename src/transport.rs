use crate::record::LogRecord;
use async_trait::async_trait;

/// Failure modes of a transport or the broker connection beneath it.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("transport call timed out")]
    Timeout,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker connection is not ready")]
    NotConnected,

    #[error("broker connect failed: {0}")]
    Connect(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("broker rejected the message")]
    Nacked,

    #[error("connection manager is shut down")]
    Closed,
}

/// Pluggable delivery mechanism for a [`LogRecord`].
///
/// Implementations transport one serialized record to a concrete
/// destination (HTTP endpoint, AMQP queue, local console). The
/// dispatcher calls `send` per record and treats any `Err` as a
/// delivery failure to report locally; transport errors never reach
/// the application.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a single record to the destination.
    ///
    /// **Returns**
    /// - `Ok(())` once the destination accepted the record (for the
    ///   queue transport, after the broker's positive confirmation).
    /// - `Err(..)` on any delivery failure.
    async fn send(&self, record: &LogRecord) -> Result<(), TransportError>;

    /// Bring the transport up before first use, if it has a startup
    /// cost (the queue transport's first broker connect). Default is
    /// a no-op; callers bound this with their own timeout.
    async fn open(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Tear the transport down, best-effort. Default is a no-op.
    async fn shutdown(&self) {}
}
