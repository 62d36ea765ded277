use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};

use crate::{
    BrokerError, Delivery, OrderMessage, Result,
    broker::{AckHandle, MessageBroker, QueueDiagnostics, Subscription},
};

#[derive(Debug, Clone)]
struct Envelope {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: usize,
    published: u64,
    acked: u64,
    requeued: u64,
    fail_on_publish: bool,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-memory broker for testing.
///
/// Models a single durable queue with AMQP-style consumer semantics:
/// per-subscription prefetch, explicit ack, and nack-with-requeue that puts
/// the message back at the head of the queue flagged as redelivered.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures publishes to fail with `Unavailable` until reset.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.shared.state.lock().await.fail_on_publish = fail;
    }

    /// Enqueues a raw body, bypassing the message codec.
    pub async fn publish_raw(&self, payload: Vec<u8>) {
        self.enqueue(payload).await;
    }

    /// Closes the queue; open subscriptions drain to `None`.
    pub async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.notify.notify_waiters();
    }

    /// Total messages accepted by `publish`.
    pub async fn published_count(&self) -> u64 {
        self.shared.state.lock().await.published
    }

    /// Total deliveries acknowledged by consumers.
    pub async fn acked_count(&self) -> u64 {
        self.shared.state.lock().await.acked
    }

    /// Total deliveries put back on the queue by consumers.
    pub async fn requeued_count(&self) -> u64 {
        self.shared.state.lock().await.requeued
    }

    /// Messages waiting to be delivered.
    pub async fn ready_count(&self) -> usize {
        self.shared.state.lock().await.ready.len()
    }

    /// Messages delivered but not yet settled.
    pub async fn unacked_count(&self) -> usize {
        self.shared.state.lock().await.unacked
    }

    async fn enqueue(&self, payload: Vec<u8>) {
        {
            let mut state = self.shared.state.lock().await;
            state.ready.push_back(Envelope {
                payload,
                redelivered: false,
            });
            state.published += 1;
        }
        self.shared.notify.notify_one();
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: &OrderMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        {
            let state = self.shared.state.lock().await;
            if state.fail_on_publish {
                return Err(BrokerError::Unavailable(
                    "publish rejected by test configuration".to_string(),
                ));
            }
        }
        self.enqueue(payload).await;
        Ok(())
    }

    async fn subscribe(&self, prefetch: u16) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            permits: Arc::new(Semaphore::new(usize::from(prefetch.max(1)))),
        }))
    }
}

#[async_trait]
impl QueueDiagnostics for InMemoryBroker {
    async fn messages_in_queue(&self) -> Option<u64> {
        let state = self.shared.state.lock().await;
        Some((state.ready.len() + state.unacked) as u64)
    }
}

struct InMemorySubscription {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        // Holding a permit is what bounds the in-flight deliveries.
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;

        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(envelope) = state.ready.pop_front() {
                    state.unacked += 1;
                    if !state.ready.is_empty() {
                        self.shared.notify.notify_one();
                    }
                    let handle = InMemoryAck {
                        shared: Arc::clone(&self.shared),
                        payload: envelope.payload.clone(),
                        permit: Mutex::new(Some(permit)),
                    };
                    return Some(Ok(Delivery::new(
                        envelope.payload,
                        envelope.redelivered,
                        Box::new(handle),
                    )));
                }
            }
            notified.await;
        }
    }
}

struct InMemoryAck {
    shared: Arc<Shared>,
    payload: Vec<u8>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl InMemoryAck {
    async fn release(&self) {
        self.permit.lock().await.take();
    }
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            state.unacked = state.unacked.saturating_sub(1);
            state.acked += 1;
        }
        self.release().await;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            state.unacked = state.unacked.saturating_sub(1);
            if requeue {
                state.ready.push_front(Envelope {
                    payload: self.payload.clone(),
                    redelivered: true,
                });
                state.requeued += 1;
            }
        }
        if requeue {
            self.shared.notify.notify_one();
        }
        self.release().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_consume_and_ack() {
        let broker = InMemoryBroker::new();
        let id = OrderId::new();
        broker.publish(&OrderMessage::new(id)).await.unwrap();

        let mut sub = broker.subscribe(1).await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();

        assert!(!delivery.redelivered());
        assert_eq!(delivery.decode().unwrap().order_id, id);
        assert_eq!(broker.messages_in_queue().await, Some(1));

        delivery.ack().await.unwrap();
        assert_eq!(broker.messages_in_queue().await, Some(0));
        assert_eq!(broker.acked_count().await, 1);
    }

    #[tokio::test]
    async fn nack_requeue_redelivers_at_head() {
        let broker = InMemoryBroker::new();
        let first = OrderId::new();
        let second = OrderId::new();
        broker.publish(&OrderMessage::new(first)).await.unwrap();
        broker.publish(&OrderMessage::new(second)).await.unwrap();

        let mut sub = broker.subscribe(1).await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        delivery.nack_requeue().await.unwrap();

        let again = sub.next_delivery().await.unwrap().unwrap();
        assert!(again.redelivered());
        assert_eq!(again.decode().unwrap().order_id, first);
        assert_eq!(broker.requeued_count().await, 1);
    }

    #[tokio::test]
    async fn prefetch_one_blocks_until_settled() {
        let broker = InMemoryBroker::new();
        broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap();
        broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap();

        let mut sub = broker.subscribe(1).await.unwrap();
        let first = sub.next_delivery().await.unwrap().unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), sub.next_delivery()).await;
        assert!(blocked.is_err(), "second delivery must wait for the first ack");
        assert_eq!(broker.unacked_count().await, 1);

        first.ack().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), sub.next_delivery())
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(1).await.unwrap();

        let consumer = tokio::spawn(async move { sub.next_delivery().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn two_consumers_share_the_queue() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe(1).await.unwrap();
        let mut b = broker.subscribe(1).await.unwrap();
        broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap();
        broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap();

        let da = a.next_delivery().await.unwrap().unwrap();
        let db = b.next_delivery().await.unwrap().unwrap();

        assert_ne!(da.decode().unwrap(), db.decode().unwrap());
        assert_eq!(broker.ready_count().await, 0);
    }

    #[tokio::test]
    async fn failing_publish_enqueues_nothing() {
        let broker = InMemoryBroker::new();
        broker.set_fail_on_publish(true).await;

        let err = broker
            .publish(&OrderMessage::new(OrderId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert_eq!(broker.published_count().await, 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(1).await.unwrap();
        broker.close().await;
        assert!(sub.next_delivery().await.is_none());
    }
}
