//! Broker channel boundary.
//!
//! [`BrokerChannel`] is the narrow slice of a broker client this crate needs:
//! settle a delivery by tag. [`SharedChannel`] wraps one channel for all
//! executors of a session and admits a single call at a time, because AMQP
//! channels are not safe for interleaved use.

use crate::error::ChannelError;
use crate::message::DeliveryHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Settlement operations exposed by a broker channel
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Acknowledge a delivery
    async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError>;

    /// Negatively acknowledge a delivery, optionally returning it to the queue
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError>;

    /// Channel number on the connection
    fn channel_id(&self) -> u16;
}

/// A broker channel shared by the executors of one session.
///
/// Cloning is cheap; clones share the same call gate.
#[derive(Clone)]
pub struct SharedChannel {
    inner: Arc<SharedChannelInner>,
}

struct SharedChannelInner {
    channel: Arc<dyn BrokerChannel>,
    gate: Mutex<()>,
}

impl SharedChannel {
    /// Wrap a broker channel
    pub fn new(channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            inner: Arc::new(SharedChannelInner {
                channel,
                gate: Mutex::new(()),
            }),
        }
    }

    /// Channel number on the connection
    pub fn channel_id(&self) -> u16 {
        self.inner.channel.channel_id()
    }

    /// Build a delivery handle for a tag received on this channel
    pub fn handle(&self, delivery_tag: u64) -> DeliveryHandle {
        DeliveryHandle::new(delivery_tag, self.clone())
    }

    /// Acknowledge a delivery
    pub async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError> {
        let _gate = self.inner.gate.lock().await;
        self.inner.channel.ack(delivery_tag).await
    }

    /// Negatively acknowledge a delivery
    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError> {
        let _gate = self.inner.gate.lock().await;
        self.inner.channel.nack(delivery_tag, requeue).await
    }

    /// Check if two handles point at the same underlying channel
    pub fn same_channel(&self, other: &SharedChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedChannel")
            .field("channel_id", &self.channel_id())
            .finish()
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
