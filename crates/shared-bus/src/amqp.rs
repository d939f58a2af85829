//! # AMQP Transport
//!
//! [`BusConnector`] and [`BusChannel`] over a real AMQP 0-9-1 broker such as
//! RabbitMQ, via `lapin`. Each dial opens one connection with one channel.
//!
//! Publishes on a channel are serialized through a lock, so concurrent
//! callers never interleave frames. Consumers are forwarded into the same
//! [`DeliveryStream`] the in-process broker hands out, and the stream ends
//! when the broker cancels the consumer or the connection drops.

use async_trait::async_trait;
use bytes::Bytes;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::broker::{check_uri, BusChannel, BusConnector, Publishing, QueueSpec};
use crate::delivery::{Acker, Delivery, DeliveryStream};
use crate::error::BusError;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Dials AMQP brokers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BusConnector for AmqpConnector {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn BusChannel>, BusError> {
        check_uri(uri)?;
        let dial_failed = |e: lapin::Error| BusError::Dial {
            uri: uri.to_string(),
            reason: e.to_string(),
        };

        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(dial_failed)?;
        let channel = connection.create_channel().await.map_err(dial_failed)?;
        info!(channel = channel.id(), "AMQP connection opened");

        Ok(Arc::new(AmqpChannel {
            connection: Arc::new(connection),
            channel,
            publish_lock: Mutex::new(()),
        }))
    }
}

/// One AMQP connection and its single channel.
struct AmqpChannel {
    connection: Arc<Connection>,
    channel: Channel,
    publish_lock: Mutex<()>,
}

impl AmqpChannel {
    /// A failure on a dead connection is a lost session; anything else is
    /// the broker refusing the operation.
    fn classify(&self, error: lapin::Error) -> BusError {
        if self.connection.status().connected() {
            BusError::Broker(error.to_string())
        } else {
            BusError::ConnectionClosed
        }
    }
}

#[async_trait]
impl BusChannel for AmqpChannel {
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BusError> {
        let options = QueueDeclareOptions {
            durable: spec.durable,
            exclusive: spec.exclusive,
            auto_delete: spec.auto_delete,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare(spec.name.as_deref().unwrap_or_default(), options, FieldTable::default())
            .await
            .map_err(|e| self.classify(e))?;

        debug!(queue = queue.name().as_str(), "Declared queue");
        Ok(queue.name().as_str().to_string())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publishing,
    ) -> Result<(), BusError> {
        let properties = properties(&message);
        let _serialized = self.publish_lock.lock().await;

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| self.classify(e))?;
        confirm.await.map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BusError> {
        let options = BasicConsumeOptions {
            no_ack: auto_ack,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(|e| self.classify(e))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(forward(queue.to_string(), consumer, sender, auto_ack));
        Ok(DeliveryStream::new(receiver))
    }

    async fn close(&self) -> Result<(), BusError> {
        if !self.connection.status().connected() {
            return Err(BusError::ConnectionClosed);
        }
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| self.classify(e))?;
        info!("AMQP connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

impl Drop for AmqpChannel {
    fn drop(&mut self) {
        if !self.connection.status().connected() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connection = self.connection.clone();
        runtime.spawn(async move {
            if let Err(e) = connection.close(REPLY_SUCCESS, "dropped").await {
                debug!(error = %e, "Closing dropped AMQP connection failed");
            }
        });
    }
}

/// Hand deliveries from a lapin consumer to a [`DeliveryStream`] until
/// either side goes away.
async fn forward(
    queue: String,
    consumer: Consumer,
    sender: mpsc::UnboundedSender<Delivery>,
    auto_ack: bool,
) {
    let mut consumer = Box::pin(consumer);
    while let Some(next) = consumer.next().await {
        let mut delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(queue = %queue, error = %e, "AMQP consumer failed");
                break;
            }
        };

        let message = publishing(&delivery.properties, std::mem::take(&mut delivery.data));
        let tag = delivery.delivery_tag;
        let redelivered = delivery.redelivered;
        let acker = (!auto_ack).then(|| Arc::new(AmqpAcker { delivery }) as Arc<dyn Acker>);

        if sender.send(Delivery::new(tag, redelivered, message, acker)).is_err() {
            debug!(queue = %queue, "Delivery stream dropped, stopping consumer");
            break;
        }
    }
    debug!(queue = %queue, "AMQP consumer ended");
}

/// Settles one delivery on the channel that received it.
struct AmqpAcker {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self, _delivery_tag: u64) -> Result<(), BusError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Broker(e.to_string()))
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<(), BusError> {
        self.delivery
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| BusError::Broker(e.to_string()))
    }
}

fn properties(message: &Publishing) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(message.content_type.clone()));
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(reply_to) = &message.reply_to {
        properties = properties.with_reply_to(ShortString::from(reply_to.clone()));
    }
    properties
}

fn publishing(properties: &BasicProperties, body: Vec<u8>) -> Publishing {
    let text = |value: &Option<ShortString>| value.as_ref().map(|v| v.as_str().to_string());
    Publishing {
        content_type: text(properties.content_type()).unwrap_or_default(),
        correlation_id: text(properties.correlation_id()),
        reply_to: text(properties.reply_to()),
        body: Bytes::from(body),
    }
}
