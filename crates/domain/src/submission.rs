//! Order submission: the idempotent, atomic order + outbox write.

use chrono::Utc;
use common::{CustomerId, OrderId};
use order_store::{InsertOutcome, NewOrder, Order, OrderLine, OrderStore, OrderStoreExt};

use crate::{DomainError, Result};

/// Command to submit a new order.
#[derive(Debug, Clone)]
pub struct SubmitOrder {
    /// Client-supplied id, also the idempotency key.
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLine>,
}

impl SubmitOrder {
    pub fn new(
        order_id: OrderId,
        customer_id: impl Into<CustomerId>,
        items: Vec<OrderLine>,
    ) -> Self {
        Self {
            order_id,
            customer_id: customer_id.into(),
            items,
        }
    }
}

/// Whether a submission wrote anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Created,
    AlreadyExists,
}

/// Acknowledgement returned for every well-formed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub order_id: OrderId,
    pub outcome: SubmissionOutcome,
}

/// Accepts new orders.
///
/// A repeated order id is acknowledged exactly like a new one and never
/// overwrites the stored order.
pub struct SubmissionHandler<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> SubmissionHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submits an order, creating it together with its outbox entry.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn submit(&self, cmd: SubmitOrder) -> Result<SubmissionReceipt> {
        if cmd.customer_id.is_blank() {
            return Err(DomainError::Validation(
                "customerId must not be empty".to_string(),
            ));
        }

        let order_id = cmd.order_id;
        if self.store.order_exists(order_id).await? {
            return Ok(Self::duplicate(order_id));
        }

        let outcome = self
            .store
            .insert_order_with_outbox(NewOrder {
                id: order_id,
                customer_id: cmd.customer_id,
                items: cmd.items,
                created_at: Utc::now(),
            })
            .await?;

        match outcome {
            InsertOutcome::Created { outbox_id } => {
                metrics::counter!("orders_submitted_total").increment(1);
                tracing::info!(%outbox_id, "order accepted");
                Ok(SubmissionReceipt {
                    order_id,
                    outcome: SubmissionOutcome::Created,
                })
            }
            // Lost a race against a concurrent submission of the same id.
            InsertOutcome::AlreadyExists => Ok(Self::duplicate(order_id)),
        }
    }

    /// Looks up an order by id.
    pub async fn lookup(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?)
    }

    fn duplicate(order_id: OrderId) -> SubmissionReceipt {
        metrics::counter!("orders_duplicate_total").increment(1);
        tracing::info!("duplicate submission acknowledged without writes");
        SubmissionReceipt {
            order_id,
            outcome: SubmissionOutcome::AlreadyExists,
        }
    }
}
