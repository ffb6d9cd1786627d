use crate::config::QueueConfig;
use crate::queue::{Broker, BrokerChannel, BrokerLink};
use crate::transport::TransportError;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

fn broker_err(err: lapin::Error) -> TransportError {
    TransportError::Broker(err.to_string())
}

/// AMQP implementation of [`Broker`] backed by `lapin`.
///
/// Each connect establishes a connection, opens a channel in confirm
/// mode and declares the target queue as durable, so a returned link
/// can publish with at-least-once semantics straight away. Connection
/// errors surface through the link's loss signal, which the manager
/// turns into a reconnect.
#[derive(Clone, Default)]
pub struct AmqpBroker;

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self, config: &QueueConfig) -> Result<BrokerLink, TransportError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (lost_tx, lost) = oneshot::channel();
        let lost_tx = Mutex::new(Some(lost_tx));
        connection.on_error(move |err| {
            if let Some(tx) = lost_tx.lock().unwrap().take() {
                let _ = tx.send(TransportError::Broker(err.to_string()));
            }
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(BrokerLink {
            channel: Arc::new(AmqpChannel {
                connection,
                channel,
                queue: config.queue.clone(),
            }),
            lost,
        })
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    queue: String,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                // Delivery mode 2 marks the message persistent.
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(broker_err)?
            .await
            .map_err(broker_err)?;

        match confirm {
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => Err(TransportError::Nacked),
        }
    }

    async fn close(&self) {
        if let Err(err) = self.channel.close(200, "closing").await {
            tracing::debug!(target: "log_relay", "amqp channel close failed: {err}");
        }
        if let Err(err) = self.connection.close(200, "closing").await {
            tracing::debug!(target: "log_relay", "amqp connection close failed: {err}");
        }
    }
}
