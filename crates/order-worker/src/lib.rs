//! Order worker.
//!
//! Consumes order notifications one at a time, prices pending orders
//! against inventory and finalizes them under optimistic concurrency.
//! Settlement rules:
//! - finalized, already processed, missing order, lost race: ack
//! - anything else, including an undecodable body: nack and requeue

pub mod error;
pub mod worker;

pub use error::{Result, WorkerError};
pub use worker::{OrderWorker, PREFETCH, ProcessOutcome, Settlement};
