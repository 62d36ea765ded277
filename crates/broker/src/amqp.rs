use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};

use crate::{
    BrokerError, Delivery, OrderMessage, Result,
    broker::{AckHandle, MessageBroker, Subscription},
};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

const CLOSE_OK: u16 = 200;

/// AMQP 0-9-1 broker backed by a single connection.
///
/// Publishes go through one confirm-mode channel; every subscription gets
/// its own channel so prefetch limits apply per consumer.
pub struct AmqpBroker {
    connection: Connection,
    publish_channel: Channel,
    queue: String,
}

impl AmqpBroker {
    /// Connects to the broker and declares the durable work queue.
    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str, queue: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let publish_channel = connection.create_channel().await?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_queue(&publish_channel, queue).await?;

        tracing::info!(queue, "connected to AMQP broker");

        Ok(Self {
            connection,
            publish_channel,
            queue: queue.to_string(),
        })
    }

    /// Returns the name of the work queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Closes the publish channel and the connection.
    pub async fn close(&self) -> Result<()> {
        self.publish_channel.close(CLOSE_OK, "shutdown").await?;
        self.connection.close(CLOSE_OK, "shutdown").await?;
        Ok(())
    }
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn publish(&self, message: &OrderMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = self
            .publish_channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::PublishRejected {
                queue: self.queue.clone(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, prefetch: u16) -> Result<Box<dyn Subscription>> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        declare_queue(&channel, &self.queue).await?;

        let consumer = channel
            .basic_consume(
                &self.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Box::new(AmqpSubscription {
            _channel: channel,
            consumer,
        }))
    }
}

struct AmqpSubscription {
    // Dropping the channel would cancel the consumer.
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(BrokerError::Amqp(e))),
        };

        Some(Ok(Delivery::new(
            delivery.data,
            delivery.redelivered,
            Box::new(AmqpAck {
                acker: delivery.acker,
            }),
        )))
    }
}

struct AmqpAck {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl AckHandle for AmqpAck {
    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
