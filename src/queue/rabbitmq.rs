use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{decode_body, Channel, InFlightMessage, MessageStream, MetricEvent};
use crate::error::QueueError;

/// Default number of unacknowledged deliveries the broker hands to one consumer.
pub const PREFETCH_COUNT: u16 = 3;

/// AMQP 0-9-1 persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Broker-backed [`Channel`] over a single AMQP connection.
pub struct RabbitMqChannel {
    connection: Connection,
    channel: lapin::Channel,
    prefetch: u16,
}

/// One broker delivery, decoded lazily.
pub struct RabbitMqMessage {
    delivery: Delivery,
    data: Option<MetricEvent>,
}

impl RabbitMqChannel {
    /// Dials the broker at `url` and opens a channel on it.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(format!("failed to connect to RabbitMQ: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("failed to create channel: {e}")))?;

        Ok(Self {
            connection,
            channel,
            prefetch: PREFETCH_COUNT,
        })
    }

    /// Overrides the per-consumer in-flight credit applied by `consume_metrics`.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }
}

#[async_trait]
impl Channel for RabbitMqChannel {
    async fn declare_exchange(&self, exchange: &str, durable: bool) -> Result<(), QueueError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Declare {
                name: exchange.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn declare_queue(
        &self,
        exchange: &str,
        queue: &str,
        durable: bool,
    ) -> Result<(), QueueError> {
        let declare_err = |e: lapin::Error| QueueError::Declare {
            name: queue.to_owned(),
            reason: e.to_string(),
        };

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(declare_err)?;

        // Fanout: the routing key is ignored
        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(declare_err)
    }

    async fn publish_metric(&self, exchange: &str, event: &MetricEvent) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| QueueError::Publish(e.to_string()))?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn consume_metrics(&self, queue: &str) -> Result<MessageStream, QueueError> {
        // Passive declare only checks existence; the broker answers 404 otherwise
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| QueueError::QueueNotFound(queue.to_owned()))?;

        self.channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        // Forward deliveries until the broker goes away or nobody listens
        let (tx, rx) = mpsc::unbounded_channel::<Box<dyn InFlightMessage>>();
        let queue = queue.to_owned();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let msg = RabbitMqMessage {
                            delivery,
                            data: None,
                        };
                        if tx.send(Box::new(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "consumer stream failed");
                        break;
                    }
                }
            }
            debug!(queue = %queue, "consumer stream ended");
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.channel.close(200, "bye").await?;
        self.connection.close(200, "bye").await?;
        Ok(())
    }
}

#[async_trait]
impl InFlightMessage for RabbitMqMessage {
    fn metric_data(&mut self) -> Result<MetricEvent, QueueError> {
        decode_body(&mut self.data, &self.delivery.data)
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }

    async fn nack(&self) -> Result<(), QueueError> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }
}
