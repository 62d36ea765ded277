//! Read-only pipeline statistics.

use std::sync::Arc;
use std::time::Duration;

use broker::QueueDiagnostics;
use chrono::{DateTime, Utc};
use order_store::{OrderStore, StatusCount};
use serde::Serialize;

use crate::Result;

/// Trailing window for the "last minute" counters.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Broker-side view. Absent when the broker could not be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub messages_in_queue: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub created: u64,
    pub processed: u64,
}

/// Snapshot returned by [`StatsAggregator::collect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub timestamp: DateTime<Utc>,
    pub queue: QueueStats,
    pub last_minute: WindowCounts,
    pub total_by_status: Vec<StatusCount>,
    pub total_orders: u64,
}

/// Combines store counts with the broker's queue depth.
pub struct StatsAggregator<S: OrderStore> {
    store: S,
    diagnostics: Arc<dyn QueueDiagnostics>,
    window: Duration,
}

impl<S: OrderStore> StatsAggregator<S> {
    pub fn new(store: S, diagnostics: Arc<dyn QueueDiagnostics>) -> Self {
        Self {
            store,
            diagnostics,
            window: DEFAULT_WINDOW,
        }
    }

    /// Overrides the trailing window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Collects a snapshot. Store failures propagate; a broker that
    /// cannot be reached only leaves the queue depth empty.
    pub async fn collect(&self) -> Result<OrderStats> {
        let now = Utc::now();
        let since = now
            - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::seconds(60));

        let total_by_status = self.store.count_orders_by_status().await?;
        let created = self.store.count_created_since(since).await?;
        let processed = self.store.count_processed_since(since).await?;
        let messages_in_queue = self.diagnostics.messages_in_queue().await;

        if messages_in_queue.is_none() {
            tracing::debug!("queue depth missing from stats");
        }

        let total_orders = total_by_status.iter().map(|s| s.count).sum();

        Ok(OrderStats {
            timestamp: now,
            queue: QueueStats { messages_in_queue },
            last_minute: WindowCounts { created, processed },
            total_by_status,
            total_orders,
        })
    }
}
