use crate::config::QueueConfig;
use crate::diag::DiagnosticSink;
use crate::record::LogRecord;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

/// Lifecycle of the broker connection, owned exclusively by the
/// [`QueueManager`] task. Other components observe it only through the
/// manager's operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// An established broker channel plus the signal that fires when the
/// underlying connection is lost.
pub struct BrokerLink {
    pub channel: Arc<dyn BrokerChannel>,
    pub lost: oneshot::Receiver<TransportError>,
}

/// Connection factory for a message broker.
///
/// A successful `connect` has already declared the target queue as
/// durable; the returned link is ready to publish. The production
/// implementation is [`crate::amqp::AmqpBroker`]; tests use scripted
/// mocks to drive the manager's state machine.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, config: &QueueConfig) -> Result<BrokerLink, TransportError>;
}

/// Publishing side of an established broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish one persistent message to the target queue, resolving
    /// only after the broker's positive confirmation. A negative
    /// acknowledgment or channel error is an `Err`.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close channel then connection, best-effort.
    async fn close(&self);
}

enum Command {
    Connect(oneshot::Sender<()>),
    Send(Vec<u8>, oneshot::Sender<Result<(), TransportError>>),
    State(oneshot::Sender<ConnectionState>),
    Close(oneshot::Sender<()>),
}

/// Handle to the task that owns the broker connection.
///
/// All state transitions happen inside a single tokio task; handles
/// are clonable mpsc senders, so concurrent `connect()` callers are
/// serialized by construction and cannot start a second retry loop.
/// The reconnect loop retries forever with the configured fixed delay;
/// there is no attempt cap and no backoff growth.
#[derive(Clone)]
pub struct QueueManager {
    tx: mpsc::Sender<Command>,
}

impl QueueManager {
    /// Spawn the owning task. The connection is not established until
    /// [`connect`](Self::connect) is first called.
    pub fn new(broker: Arc<dyn Broker>, config: QueueConfig, diag: Arc<dyn DiagnosticSink>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let task = ManagerTask {
            rx,
            broker,
            config,
            diag,
            state: ConnectionState::Disconnected,
            channel: None,
            waiters: Vec::new(),
        };
        tokio::spawn(task.run());
        Self { tx }
    }

    /// Ensure the connection is up, resolving once the manager reaches
    /// `Connected`. Idempotent: while already connected this returns
    /// immediately, while connecting the caller is parked behind the
    /// single in-flight retry loop. On persistent broker failure this
    /// future does not resolve; callers bound it with a timeout.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Connect(ack_tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        ack_rx.await.map_err(|_| TransportError::Closed)
    }

    /// Publish one payload through the current channel. Fails with
    /// [`TransportError::NotConnected`] when the channel is not ready;
    /// the manager never buffers messages client-side.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Command::Send(payload, resp_tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        resp_rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Current connection state, as observed through the owning task.
    pub async fn state(&self) -> ConnectionState {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(Command::State(resp_tx)).await.is_err() {
            return ConnectionState::Disconnected;
        }
        resp_rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Transition to `Disconnected` unconditionally and close channel
    /// then connection, best-effort. The manager stays usable; a later
    /// `connect()` starts over.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Close(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct ManagerTask {
    rx: mpsc::Receiver<Command>,
    broker: Arc<dyn Broker>,
    config: QueueConfig,
    diag: Arc<dyn DiagnosticSink>,
    state: ConnectionState,
    channel: Option<Arc<dyn BrokerChannel>>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl ManagerTask {
    async fn run(mut self) {
        let mut lost_rx: Option<oneshot::Receiver<TransportError>> = None;
        // Next attempt time while in Connecting.
        let mut retry_at: Option<Instant> = None;

        loop {
            let connected = self.state == ConnectionState::Connected && lost_rx.is_some();
            let connecting = self.state == ConnectionState::Connecting && retry_at.is_some();

            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Command::Connect(ack) => match self.state {
                            ConnectionState::Connected => {
                                let _ = ack.send(());
                            }
                            ConnectionState::Connecting => {
                                self.waiters.push(ack);
                            }
                            ConnectionState::Disconnected => {
                                self.waiters.push(ack);
                                self.state = ConnectionState::Connecting;
                                retry_at = Some(Instant::now());
                            }
                        },
                        Command::Send(payload, resp) => {
                            match (&self.channel, self.state) {
                                (Some(channel), ConnectionState::Connected) => {
                                    // Publish off the owning task so a slow broker
                                    // cannot stall state transitions.
                                    let channel = Arc::clone(channel);
                                    tokio::spawn(async move {
                                        let _ = resp.send(channel.publish(payload).await);
                                    });
                                }
                                _ => {
                                    let _ = resp.send(Err(TransportError::NotConnected));
                                }
                            }
                        }
                        Command::State(resp) => {
                            let _ = resp.send(self.state);
                        }
                        Command::Close(ack) => {
                            self.state = ConnectionState::Disconnected;
                            retry_at = None;
                            lost_rx = None;
                            self.waiters.clear();
                            if let Some(channel) = self.channel.take() {
                                channel.close().await;
                            }
                            let _ = ack.send(());
                        }
                    }
                }
                lost = async { lost_rx.as_mut().expect("guarded").await }, if connected => {
                    let reason = match lost {
                        Ok(err) => err.to_string(),
                        Err(_) => "connection handle dropped".to_string(),
                    };
                    self.diag.error(&format!("queue connection lost: {reason}; reconnecting"));
                    self.channel = None;
                    lost_rx = None;
                    self.state = ConnectionState::Connecting;
                    retry_at = Some(Instant::now());
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if connecting => {
                    match self.broker.connect(&self.config).await {
                        Ok(link) => {
                            self.channel = Some(link.channel);
                            lost_rx = Some(link.lost);
                            self.state = ConnectionState::Connected;
                            retry_at = None;
                            for waiter in self.waiters.drain(..) {
                                let _ = waiter.send(());
                            }
                            self.diag.info(&format!(
                                "queue connection established to {}:{} (queue {})",
                                self.config.host, self.config.port, self.config.queue
                            ));
                        }
                        Err(err) => {
                            self.diag.error(&format!(
                                "queue connect failed: {err}; retrying in {:?}",
                                self.config.retry_delay
                            ));
                            retry_at = Some(Instant::now() + self.config.retry_delay);
                        }
                    }
                }
            }
        }

        // All handles dropped: tear the connection down.
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

/// Queue implementation of [`Transport`]: JSON-encodes the record and
/// hands it to the [`QueueManager`], relying on the broker's durable
/// queue plus message persistence for at-least-once delivery.
pub struct QueueTransport {
    manager: QueueManager,
}

impl QueueTransport {
    pub fn new(broker: Arc<dyn Broker>, config: QueueConfig, diag: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            manager: QueueManager::new(broker, config, diag),
        }
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }
}

#[async_trait]
impl Transport for QueueTransport {
    async fn send(&self, record: &LogRecord) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(record)?;
        self.manager.send(payload).await
    }

    async fn open(&self) -> Result<(), TransportError> {
        self.manager.connect().await
    }

    async fn shutdown(&self) {
        self.manager.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CaptureDiag;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Broker that replays a script of connect outcomes and records
    /// the (paused-clock) instant of every attempt.
    struct ScriptedBroker {
        script: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<Instant>>,
        channel: Arc<MockChannel>,
        // Loss trigger for the most recent successful connect.
        lost_tx: Mutex<Option<oneshot::Sender<TransportError>>>,
    }

    impl ScriptedBroker {
        fn new(script: Vec<bool>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
                channel: Arc::new(MockChannel::default()),
                lost_tx: Mutex::new(None),
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }

        fn drop_connection(&self) {
            if let Some(tx) = self.lost_tx.lock().unwrap().take() {
                let _ = tx.send(TransportError::Broker("simulated loss".into()));
            }
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn connect(&self, _config: &QueueConfig) -> Result<BrokerLink, TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if !ok {
                return Err(TransportError::Connect("simulated refusal".into()));
            }
            let (lost_tx, lost) = oneshot::channel();
            *self.lost_tx.lock().unwrap() = Some(lost_tx);
            Ok(BrokerLink {
                channel: Arc::clone(&self.channel) as Arc<dyn BrokerChannel>,
                lost,
            })
        }
    }

    /// Channel that acknowledges or rejects per a script (default ack)
    /// and counts published payloads.
    #[derive(Default)]
    struct MockChannel {
        acks: Mutex<VecDeque<bool>>,
        published: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl BrokerChannel for MockChannel {
        async fn publish(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            let ack = self.acks.lock().unwrap().pop_front().unwrap_or(true);
            if ack {
                Ok(())
            } else {
                Err(TransportError::Nacked)
            }
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(retry_ms: u64) -> QueueConfig {
        QueueConfig {
            retry_delay: Duration::from_millis(retry_ms),
            ..QueueConfig::default()
        }
    }

    async fn wait_for_state(manager: &QueueManager, want: ConnectionState) {
        loop {
            if manager.state().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_fixed_delay_until_success() {
        let broker = ScriptedBroker::new(vec![false, false, false, true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(1000), diag.clone());

        manager.connect().await.unwrap();
        assert_eq!(manager.state().await, ConnectionState::Connected);

        let attempts = broker.attempts();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        // Three failures reported locally, one success notice.
        assert_eq!(diag.count_at(crate::diag::DiagLevel::Error), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn state_stays_connecting_while_attempts_fail() {
        let broker = ScriptedBroker::new(vec![false, false, false, false, true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(100), diag);

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };

        wait_for_state(&manager, ConnectionState::Connecting).await;
        // Let a couple of failed attempts elapse; still not connected.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(manager.state().await, ConnectionState::Connecting);

        waiter.await.unwrap().unwrap();
        assert_eq!(manager.state().await, ConnectionState::Connected);
        assert_eq!(broker.attempts().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_retry_loop() {
        let broker = ScriptedBroker::new(vec![false, false, true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(200), diag);

        let mut joins = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            joins.push(tokio::spawn(async move { manager.connect().await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        // A single loop: two failures plus the success, not 4x.
        assert_eq!(broker.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_a_noop_when_already_connected() {
        let broker = ScriptedBroker::new(vec![true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(100), diag);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(broker.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_a_connected_channel() {
        let broker = ScriptedBroker::new(vec![true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(100), diag);

        let err = manager.send(b"payload".to_vec()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(broker.channel.published.load(Ordering::SeqCst), 0);

        manager.connect().await.unwrap();
        manager.send(b"payload".to_vec()).await.unwrap();
        assert_eq!(broker.channel.published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_rejects_on_negative_acknowledgment() {
        let broker = ScriptedBroker::new(vec![true]);
        broker.channel.acks.lock().unwrap().extend([false, true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(100), diag);

        manager.connect().await.unwrap();
        let err = manager.send(b"one".to_vec()).await.unwrap_err();
        assert!(matches!(err, TransportError::Nacked));
        manager.send(b"two".to_vec()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_triggers_self_healing_reconnect() {
        let broker = ScriptedBroker::new(vec![true, false, true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(300), diag.clone());

        manager.connect().await.unwrap();
        assert_eq!(broker.attempts().len(), 1);

        broker.drop_connection();
        wait_for_state(&manager, ConnectionState::Connected).await;

        // Loss re-entered connecting, one failed retry, then success.
        assert_eq!(broker.attempts().len(), 3);
        let messages = diag.messages();
        assert!(messages
            .iter()
            .any(|(_, m)| m.contains("queue connection lost")));
    }

    #[tokio::test(start_paused = true)]
    async fn close_disconnects_and_stops_the_retry_loop() {
        let broker = ScriptedBroker::new(vec![true]);
        let diag = Arc::new(CaptureDiag::new());
        let manager = QueueManager::new(broker.clone(), config(100), diag);

        manager.connect().await.unwrap();
        manager.close().await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert_eq!(broker.channel.closed.load(Ordering::SeqCst), 1);

        let err = manager.send(b"late".to_vec()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        // Dropping the connection after close must not restart anything.
        broker.drop_connection();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(broker.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_transport_serializes_and_publishes() {
        let broker = ScriptedBroker::new(vec![true]);
        let diag = Arc::new(CaptureDiag::new());
        let transport = QueueTransport::new(broker.clone(), config(100), diag);

        transport.open().await.unwrap();
        let ctx = crate::record::RecordContext {
            host: "h".into(),
            env: "test".into(),
            app_name: "a".into(),
        };
        let record =
            crate::record::build_record("m", "f", None, crate::record::Severity::Error, &ctx);
        transport.send(&record).await.unwrap();
        assert_eq!(broker.channel.published.load(Ordering::SeqCst), 1);

        transport.shutdown().await;
        assert_eq!(
            transport.manager().state().await,
            ConnectionState::Disconnected
        );
    }
}
