use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Notification that an order is ready to be finalized.
///
/// Carries only the id; consumers reload the order from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    pub order_id: OrderId,
}

impl OrderMessage {
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }

    /// Encodes the message as a JSON body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a JSON body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
