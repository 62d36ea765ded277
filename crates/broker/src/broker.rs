use async_trait::async_trait;

use crate::{OrderMessage, Result};

/// Core trait for broker implementations.
///
/// Publishing is durable: a successful return means the broker accepted
/// responsibility for the message. Delivery is at-least-once.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a persistent order notification to the work queue.
    async fn publish(&self, message: &OrderMessage) -> Result<()>;

    /// Opens a consumer on the work queue with at most `prefetch`
    /// unacknowledged deliveries outstanding.
    async fn subscribe(&self, prefetch: u16) -> Result<Box<dyn Subscription>>;
}

/// A stream of deliveries from the work queue.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery.
    ///
    /// Returns `None` once the subscription is closed for good.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

/// Broker-specific acknowledgement of a single delivery.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// Best-effort queue depth lookup.
#[async_trait]
pub trait QueueDiagnostics: Send + Sync {
    /// Returns the number of messages in the work queue, or `None` if the
    /// broker could not be asked.
    async fn messages_in_queue(&self) -> Option<u64>;
}

/// A message handed to a consumer.
///
/// Must be settled with exactly one of [`Delivery::ack`] or
/// [`Delivery::nack_requeue`]; both consume the delivery.
pub struct Delivery {
    payload: Vec<u8>,
    redelivered: bool,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, handle: Box<dyn AckHandle>) -> Self {
        Self {
            payload,
            redelivered,
            handle,
        }
    }

    /// Raw message body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True if the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Decodes the body as an order notification.
    pub fn decode(&self) -> Result<OrderMessage> {
        OrderMessage::from_bytes(&self.payload)
    }

    /// Acknowledges the delivery; the broker forgets the message.
    pub async fn ack(self) -> Result<()> {
        self.handle.ack().await
    }

    /// Rejects the delivery and asks the broker to deliver it again.
    pub async fn nack_requeue(self) -> Result<()> {
        self.handle.nack(true).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[async_trait]
impl<T: MessageBroker + ?Sized> MessageBroker for std::sync::Arc<T> {
    async fn publish(&self, message: &OrderMessage) -> Result<()> {
        (**self).publish(message).await
    }

    async fn subscribe(&self, prefetch: u16) -> Result<Box<dyn Subscription>> {
        (**self).subscribe(prefetch).await
    }
}

#[async_trait]
impl<T: QueueDiagnostics + ?Sized> QueueDiagnostics for std::sync::Arc<T> {
    async fn messages_in_queue(&self) -> Option<u64> {
        (**self).messages_in_queue().await
    }
}
