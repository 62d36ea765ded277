//! Outbox relay.
//!
//! Polls the order store for unpublished outbox entries and publishes one
//! notification per entry, marking each entry published right after the
//! broker confirms it.

pub mod error;
pub mod relay;

pub use error::{RelayError, Result};
pub use relay::{OutboxRelay, RelayConfig, RelayReport};
