//! Message types for outcome operations including core domain identifiers.

use crate::channel::SharedChannel;
use crate::error::ValidationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transport name reported for messages received over an AMQP channel
pub const AMQP_TRANSPORT: &str = "amqp";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Unique identifier for messages flowing through the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Receipts
// ============================================================================

/// Broker reference for a received message: the delivery tag plus the channel
/// that delivered it.
///
/// A handle is only meaningful on its own channel. Once that channel closes the
/// broker answers outcome calls with an "unknown delivery tag" close, which the
/// coordinator treats as already settled.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    delivery_tag: u64,
    channel: SharedChannel,
}

impl DeliveryHandle {
    /// Create new delivery handle
    pub fn new(delivery_tag: u64, channel: SharedChannel) -> Self {
        Self {
            delivery_tag,
            channel,
        }
    }

    /// Get the broker-assigned delivery tag
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Get the channel the message was delivered on
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

/// Transport-specific token used to settle a received message
#[derive(Debug, Clone)]
pub enum Receipt {
    /// Delivered over an AMQP channel this dispatcher can settle
    Amqp(DeliveryHandle),
    /// Delivered by some other transport
    External { transport: String, token: String },
}

impl Receipt {
    /// Name of the transport that issued the receipt
    pub fn transport(&self) -> &str {
        match self {
            Self::Amqp(_) => AMQP_TRANSPORT,
            Self::External { transport, .. } => transport,
        }
    }
}

// ============================================================================
// Received Messages
// ============================================================================

/// A message received from a transport, waiting for its outcome
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub receipt: Receipt,
}

impl ReceivedMessage {
    /// Create new received message
    pub fn new(message_id: MessageId, body: Bytes, receipt: Receipt) -> Self {
        Self {
            message_id,
            body,
            receipt,
        }
    }

    /// Get the AMQP delivery handle if the message arrived over AMQP
    pub fn as_delivery_handle(&self) -> Option<&DeliveryHandle> {
        match &self.receipt {
            Receipt::Amqp(handle) => Some(handle),
            Receipt::External { .. } => None,
        }
    }

    /// Name of the transport the message arrived on
    pub fn transport(&self) -> &str {
        self.receipt.transport()
    }

}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
