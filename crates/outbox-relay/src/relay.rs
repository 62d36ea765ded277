use std::time::Duration;

use broker::{MessageBroker, OrderMessage};
use chrono::Utc;
use order_store::{OrderStore, OutboxEntry};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Relay scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Pause between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Maximum entries handled per tick.
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

/// What a single tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Publishes unpublished outbox entries, oldest first.
///
/// Delivery is at-least-once: a crash between the broker confirm and the
/// mark-write re-publishes that entry on the next start.
pub struct OutboxRelay<S: OrderStore, B: MessageBroker> {
    store: S,
    broker: B,
    config: RelayConfig,
}

impl<S: OrderStore, B: MessageBroker> OutboxRelay<S, B> {
    pub fn new(store: S, broker: B, config: RelayConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    pub fn config(&self) -> RelayConfig {
        self.config
    }

    /// Runs one tick: relays up to `batch_size` entries.
    ///
    /// A failed publish leaves its entry for the next tick and moves on.
    /// A failed mark-write aborts the tick.
    #[tracing::instrument(skip(self))]
    pub async fn relay_batch(&self) -> Result<RelayReport> {
        let entries = self
            .store
            .fetch_unpublished(self.config.batch_size)
            .await?;

        let mut report = RelayReport::default();
        for entry in entries {
            if self.relay_entry(&entry).await? {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.published > 0 || report.failed > 0 {
            tracing::info!(
                published = report.published,
                failed = report.failed,
                "relay tick complete"
            );
        }
        Ok(report)
    }

    async fn relay_entry(&self, entry: &OutboxEntry) -> Result<bool> {
        let message = OrderMessage::new(entry.order_id);
        if let Err(e) = self.broker.publish(&message).await {
            metrics::counter!("outbox_publish_failures_total").increment(1);
            tracing::warn!(
                entry_id = %entry.id,
                order_id = %entry.order_id,
                error = %e,
                "publish failed, will retry next tick"
            );
            return Ok(false);
        }

        let marked = self.store.mark_published(entry.id, Utc::now()).await?;
        if !marked {
            tracing::debug!(entry_id = %entry.id, "entry was already marked published");
        }
        metrics::counter!("outbox_published_total").increment(1);
        Ok(true)
    }

    /// Runs the sleep-then-poll loop until `shutdown` is cancelled.
    ///
    /// A tick in progress is never interrupted; cancellation only stops the
    /// next one from being scheduled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            if let Err(e) = self.relay_batch().await {
                tracing::error!(error = %e, "relay tick failed");
            }
        }

        tracing::info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker::{BrokerError, InMemoryBroker, Subscription};
    use chrono::DateTime;
    use common::OrderId;
    use order_store::{InMemoryOrderStore, NewOrder};
    use std::sync::Arc;

    async fn submit(store: &InMemoryOrderStore, created_at: DateTime<Utc>) -> OrderId {
        let id = OrderId::new();
        store
            .insert_order_with_outbox(NewOrder {
                id,
                customer_id: "c".into(),
                items: Vec::new(),
                created_at,
            })
            .await
            .unwrap();
        id
    }

    async fn drain(broker: &InMemoryBroker) -> Vec<OrderId> {
        let mut sub = broker.subscribe(u16::MAX).await.unwrap();
        let mut ids = Vec::new();
        while broker.ready_count().await > 0 {
            let delivery = sub.next_delivery().await.unwrap().unwrap();
            ids.push(delivery.decode().unwrap().order_id);
            delivery.ack().await.unwrap();
        }
        ids
    }

    /// Rejects publishes for one order id.
    struct RejectOne {
        inner: InMemoryBroker,
        reject: OrderId,
    }

    #[async_trait]
    impl MessageBroker for RejectOne {
        async fn publish(&self, message: &OrderMessage) -> broker::Result<()> {
            if message.order_id == self.reject {
                return Err(BrokerError::Unavailable("rejected".to_string()));
            }
            self.inner.publish(message).await
        }

        async fn subscribe(&self, prefetch: u16) -> broker::Result<Box<dyn Subscription>> {
            self.inner.subscribe(prefetch).await
        }
    }

    #[tokio::test]
    async fn publishes_oldest_first_and_marks_each_entry() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        let now = Utc::now();
        let newer = submit(&store, now).await;
        let older = submit(&store, now - chrono::Duration::seconds(10)).await;

        let relay = OutboxRelay::new(store.clone(), broker.clone(), RelayConfig::default());
        let report = relay.relay_batch().await.unwrap();

        assert_eq!(report, RelayReport { published: 2, failed: 0 });
        assert_eq!(drain(&broker).await, vec![older, newer]);
        assert!(store.fetch_unpublished(50).await.unwrap().is_empty());
        for id in [older, newer] {
            let entries = store.outbox_entries_for_order(id).await.unwrap();
            assert!(entries[0].is_published());
        }
    }

    #[tokio::test]
    async fn batch_size_bounds_a_tick() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        for _ in 0..5 {
            submit(&store, Utc::now()).await;
        }
        let config = RelayConfig {
            batch_size: 3,
            ..RelayConfig::default()
        };
        let relay = OutboxRelay::new(store.clone(), broker.clone(), config);

        assert_eq!(relay.relay_batch().await.unwrap().published, 3);
        assert_eq!(relay.relay_batch().await.unwrap().published, 2);
        assert_eq!(relay.relay_batch().await.unwrap(), RelayReport::default());
        assert_eq!(broker.published_count().await, 5);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_next_tick() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        let id = submit(&store, Utc::now()).await;
        let relay = OutboxRelay::new(store.clone(), broker.clone(), RelayConfig::default());

        broker.set_fail_on_publish(true).await;
        let report = relay.relay_batch().await.unwrap();
        assert_eq!(report, RelayReport { published: 0, failed: 1 });
        assert_eq!(store.fetch_unpublished(50).await.unwrap().len(), 1);

        broker.set_fail_on_publish(false).await;
        let report = relay.relay_batch().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(drain(&broker).await, vec![id]);
    }

    #[tokio::test]
    async fn one_failed_publish_does_not_block_the_rest() {
        let store = InMemoryOrderStore::new();
        let inner = InMemoryBroker::new();
        let now = Utc::now();
        let first = submit(&store, now - chrono::Duration::seconds(2)).await;
        let second = submit(&store, now).await;
        let broker = RejectOne {
            inner: inner.clone(),
            reject: first,
        };

        let relay = OutboxRelay::new(store.clone(), broker, RelayConfig::default());
        let report = relay.relay_batch().await.unwrap();

        assert_eq!(report, RelayReport { published: 1, failed: 1 });
        assert_eq!(drain(&inner).await, vec![second]);
        let pending = store.fetch_unpublished(50).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_id, first);
    }

    #[tokio::test]
    async fn run_relays_until_cancelled() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        submit(&store, Utc::now()).await;
        let config = RelayConfig {
            interval: Duration::from_millis(10),
            ..RelayConfig::default()
        };
        let relay = Arc::new(OutboxRelay::new(store.clone(), broker.clone(), config));
        let shutdown = CancellationToken::new();

        let handle = {
            let relay = Arc::clone(&relay);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.published_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broker.published_count().await, 1);
    }
}
