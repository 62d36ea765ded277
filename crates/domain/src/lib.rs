//! Domain layer for the order pipeline.
//!
//! This crate provides:
//! - [`SubmissionHandler`] for the idempotent, atomic order + outbox write
//! - [`price_order`] with the finalization pricing and stock rules
//! - [`StatsAggregator`] for the read-only pipeline statistics

pub mod error;
pub mod pricing;
pub mod stats;
pub mod submission;

pub use error::{DomainError, Result};
pub use pricing::{PricedOrder, Shortfall, price_order};
pub use stats::{OrderStats, QueueStats, StatsAggregator, WindowCounts};
pub use submission::{SubmissionHandler, SubmissionOutcome, SubmissionReceipt, SubmitOrder};
