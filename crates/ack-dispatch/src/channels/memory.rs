//! In-memory broker channel for testing and development.
//!
//! This channel behaves like an AMQP channel as far as settlement goes:
//! - Delivery tags are issued per channel, starting at 1
//! - Settling an unknown tag closes the channel with a `PRECONDITION_FAILED`
//!   reason, as a real broker does
//! - Once closed, every call fails with `AlreadyClosed` carrying the close reason
//!
//! On top of that it supports scripted failures, optional call latency and
//! detection of overlapping calls.

use crate::channel::BrokerChannel;
use crate::error::{ChannelError, UNKNOWN_DELIVERY_TAG};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Close reason the broker reports after an outcome for an unknown tag
pub fn unknown_delivery_tag_reason(delivery_tag: u64) -> String {
    format!(
        "The AMQP operation was interrupted: AMQP close-reason, initiated by Peer, code=406, \
         text='{} {}', classId=60, methodId=80",
        UNKNOWN_DELIVERY_TAG, delivery_tag
    )
}

/// Settlement call kinds understood by the in-memory channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOperation {
    /// `ack`
    Ack,
    /// `nack` with requeue
    Requeue,
    /// `nack` without requeue
    Reject,
}

impl ChannelOperation {
    fn for_nack(requeue: bool) -> Self {
        if requeue {
            Self::Requeue
        } else {
            Self::Reject
        }
    }
}

// ============================================================================
// Internal State
// ============================================================================

#[derive(Default)]
struct ChannelState {
    next_tag: u64,
    unsettled: BTreeSet<u64>,
    acknowledged: Vec<u64>,
    requeued: Vec<u64>,
    rejected: Vec<u64>,
    closed: Option<String>,
    scripted_failures: HashMap<ChannelOperation, VecDeque<ChannelError>>,
    calls: HashMap<ChannelOperation, u32>,
}

impl ChannelState {
    fn settle(&mut self, operation: ChannelOperation, delivery_tag: u64) -> Result<(), ChannelError> {
        *self.calls.entry(operation).or_insert(0) += 1;

        if let Some(error) = self
            .scripted_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        if let Some(reason) = &self.closed {
            return Err(ChannelError::AlreadyClosed {
                reason: reason.clone(),
            });
        }

        if !self.unsettled.remove(&delivery_tag) {
            let reason = unknown_delivery_tag_reason(delivery_tag);
            self.closed = Some(reason.clone());
            return Err(ChannelError::AlreadyClosed { reason });
        }

        match operation {
            ChannelOperation::Ack => self.acknowledged.push(delivery_tag),
            ChannelOperation::Requeue => self.requeued.push(delivery_tag),
            ChannelOperation::Reject => self.rejected.push(delivery_tag),
        }

        Ok(())
    }
}

// ============================================================================
// InMemoryChannel
// ============================================================================

/// In-memory broker channel
pub struct InMemoryChannel {
    channel_id: u16,
    state: Arc<Mutex<ChannelState>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    overlap_detected: AtomicBool,
}

impl InMemoryChannel {
    /// Create new in-memory channel
    pub fn new(channel_id: u16) -> Self {
        Self {
            channel_id,
            state: Arc::new(Mutex::new(ChannelState::default())),
            latency: None,
            in_flight: AtomicUsize::new(0),
            overlap_detected: AtomicBool::new(false),
        }
    }

    /// Delay every settlement call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Issue the next delivery tag, as if a message had been delivered
    pub fn deliver(&self) -> u64 {
        let mut state = self.lock();
        state.next_tag += 1;
        let tag = state.next_tag;
        state.unsettled.insert(tag);
        tag
    }

    /// Close the channel; later calls fail with `AlreadyClosed { reason }`
    pub fn close(&self, reason: impl Into<String>) {
        self.lock().closed = Some(reason.into());
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: ChannelOperation, error: ChannelError) {
        self.fail_next_times(operation, 1, error);
    }

    /// Make the next `times` calls of `operation` fail with `error`
    pub fn fail_next_times(&self, operation: ChannelOperation, times: usize, error: ChannelError) {
        let mut state = self.lock();
        let queue = state.scripted_failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Check if the channel is closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Number of calls made for `operation`, failed calls included
    pub fn call_count(&self, operation: ChannelOperation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Total number of settlement calls made
    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    /// Tags that were acknowledged, in order
    pub fn acknowledged(&self) -> Vec<u64> {
        self.lock().acknowledged.clone()
    }

    /// Tags that were returned to the queue, in order
    pub fn requeued(&self) -> Vec<u64> {
        self.lock().requeued.clone()
    }

    /// Tags that were rejected without requeue, in order
    pub fn rejected(&self) -> Vec<u64> {
        self.lock().rejected.clone()
    }

    /// Tags delivered but not yet settled
    pub fn unsettled(&self) -> Vec<u64> {
        self.lock().unsettled.iter().copied().collect()
    }

    /// Check if two settlement calls were ever in progress at the same time
    pub fn overlap_detected(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }

    async fn call(&self, operation: ChannelOperation, delivery_tag: u64) -> Result<(), ChannelError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.lock().settle(operation, delivery_tag);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError> {
        self.call(ChannelOperation::Ack, delivery_tag).await
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError> {
        self.call(ChannelOperation::for_nack(requeue), delivery_tag)
            .await
    }

    fn channel_id(&self) -> u16 {
        self.channel_id
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
