use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An AMQP protocol or connection error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker negatively confirmed a publish.
    #[error("Publish to queue '{queue}' was not confirmed by the broker")]
    PublishRejected { queue: String },

    /// The broker is unreachable or refused the operation.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A message body could not be encoded or decoded.
    #[error("Message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
