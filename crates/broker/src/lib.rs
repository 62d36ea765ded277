//! Message broker seam for the order pipeline.
//!
//! - [`MessageBroker`] publishes durable order notifications and opens
//!   prefetch-limited [`Subscription`]s with explicit acknowledgement
//! - [`AmqpBroker`] speaks AMQP 0-9-1 to a real broker
//! - [`InMemoryBroker`] reproduces the same delivery semantics in-process
//! - [`ManagementClient`] reads queue depth from the broker's HTTP
//!   management API, best effort

pub mod amqp;
pub mod broker;
pub mod error;
pub mod management;
pub mod memory;
pub mod message;

pub use amqp::AmqpBroker;
pub use broker::{AckHandle, Delivery, MessageBroker, QueueDiagnostics, Subscription};
pub use error::{BrokerError, Result};
pub use management::{ManagementClient, ManagementConfig};
pub use memory::InMemoryBroker;
pub use message::OrderMessage;
