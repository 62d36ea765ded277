use std::time::Instant;

use broker::{Delivery, Subscription};
use chrono::Utc;
use common::{Money, OrderId, ProductId};
use domain::price_order;
use order_store::{Finalization, OrderStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::{Result, WorkerError};

/// In-flight deliveries allowed per consumer.
pub const PREFETCH: u16 = 1;

/// Result of processing one order notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The order was priced and moved to Processed.
    Finalized { total: Money },
    /// The order was already Processed; nothing was written.
    AlreadyProcessed,
    /// No such order; the notification is dropped.
    OrderMissing,
    /// Another worker finalized the order first.
    StaleWrite,
}

/// How a delivery was settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
}

/// Prices and finalizes pending orders.
pub struct OrderWorker<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> OrderWorker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Processes a notification for `order_id`.
    ///
    /// Benign outcomes are returned as [`ProcessOutcome`]; only failures
    /// worth retrying are errors.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, order_id: OrderId) -> Result<ProcessOutcome> {
        let Some(order) = self.store.get_order(order_id).await? else {
            tracing::warn!("order not found, dropping notification");
            return Ok(ProcessOutcome::OrderMissing);
        };

        if order.is_processed() {
            tracing::info!("order already processed, skipping");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let started = Instant::now();
        let product_ids: Vec<ProductId> = order
            .items
            .iter()
            .map(|line| line.product_id.clone())
            .collect();
        let inventory = self.store.get_inventory(&product_ids).await?;
        let priced = price_order(&order.items, &inventory);

        for product_id in &priced.missing_products {
            tracing::warn!(%product_id, "product not in inventory, not billed");
        }
        for shortfall in &priced.shortfalls {
            tracing::warn!(
                product_id = %shortfall.product_id,
                requested = shortfall.requested,
                available = shortfall.available,
                "insufficient stock, flooring at zero"
            );
        }

        let finalization = Finalization {
            order_id,
            expected_version: order.version,
            total_amount: priced.total,
            processed_at: Utc::now(),
            adjustments: priced.adjustments,
        };

        match self.store.finalize_order(finalization).await {
            Ok(version) => {
                metrics::counter!("worker_orders_finalized_total").increment(1);
                metrics::histogram!("worker_finalize_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(total = %priced.total, version = version.as_i64(), "order processed");
                Ok(ProcessOutcome::Finalized {
                    total: priced.total,
                })
            }
            Err(StoreError::StaleWrite { expected, .. }) => {
                metrics::counter!("worker_stale_writes_total").increment(1);
                tracing::info!(
                    expected_version = expected.as_i64(),
                    "order finalized concurrently by another worker"
                );
                Ok(ProcessOutcome::StaleWrite)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Processes a delivery and settles it.
    ///
    /// Acks after a commit or a benign skip, otherwise nacks with requeue.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Settlement> {
        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, redelivered = delivery.redelivered(), "undecodable message body");
                return self.requeue(delivery).await;
            }
        };

        match self.process(message.order_id).await {
            Ok(_) => {
                delivery.ack().await?;
                Ok(Settlement::Acked)
            }
            Err(e) => {
                tracing::error!(
                    order_id = %message.order_id,
                    error = %e,
                    redelivered = delivery.redelivered(),
                    "processing failed, requeueing"
                );
                self.requeue(delivery).await
            }
        }
    }

    async fn requeue(&self, delivery: Delivery) -> Result<Settlement> {
        metrics::counter!("worker_requeued_total").increment(1);
        delivery.nack_requeue().await?;
        Ok(Settlement::Requeued)
    }

    /// Consumes `subscription` until `shutdown` is cancelled or the
    /// subscription closes.
    ///
    /// Cancellation is observed only between deliveries; a delivery being
    /// processed is always settled first.
    pub async fn run(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!("order worker consuming");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(WorkerError::Broker(e)),
                None => {
                    tracing::warn!("subscription closed");
                    break;
                }
            };

            if let Err(e) = self.handle_delivery(delivery).await {
                tracing::error!(error = %e, "failed to settle delivery");
            }
        }

        tracing::info!("order worker stopped");
        Ok(())
    }
}
