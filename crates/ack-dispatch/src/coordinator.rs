//! # Acknowledgment Coordinator
//!
//! Application-facing entry point for settling received messages. Each outcome
//! kind (complete, defer, dead-letter) is served by its own
//! [`OrderedRetryExecutor`], so a struggling kind never stalls the others while
//! items of one kind keep their submission order.
//!
//! Two broker realities are handled here rather than in the executor:
//!
//! - Messages from other transports carry no delivery handle. Settling them is
//!   a no-op with a debug record.
//! - A channel that closed with `PRECONDITION_FAILED - unknown delivery tag`
//!   has already dropped the delivery. The attempt counts as settled.

use crate::config::DispatcherConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink, Severity};
use crate::error::{ChannelError, DispatchError};
use crate::executor::{
    AttemptOutcome, Correlated, OrderedRetryExecutor, Resolution, RetryOperation,
};
use crate::message::{DeliveryHandle, MessageId, ReceivedMessage};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

// ============================================================================
// Work Items
// ============================================================================

/// Outcome requested for a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Acknowledge; the broker discards the message
    Complete,
    /// Negative-acknowledge with requeue; the broker redelivers the message
    Defer,
    /// Negative-acknowledge without requeue; the broker dead-letters the message
    DeadLetter,
}

impl OutcomeKind {
    /// All outcome kinds, in executor creation order
    pub const ALL: [OutcomeKind; 3] = [Self::Complete, Self::Defer, Self::DeadLetter];

    /// Name of the executor serving this kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Defer => "defer",
            Self::DeadLetter => "dead-letter",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A delivery handle paired with the outcome to apply to it
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub handle: DeliveryHandle,
    pub kind: OutcomeKind,
    pub message_id: MessageId,
    /// Why the message is being dead-lettered; logged only
    pub reason: Option<String>,
}

impl WorkItem {
    /// Create a work item
    pub fn new(handle: DeliveryHandle, kind: OutcomeKind, message_id: MessageId) -> Self {
        Self {
            handle,
            kind,
            message_id,
            reason: None,
        }
    }

    /// Attach a dead-letter reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Correlated for WorkItem {
    fn message_id(&self) -> Option<&MessageId> {
        Some(&self.message_id)
    }
}

// ============================================================================
// Broker Operation
// ============================================================================

/// Settles one work item against its channel and classifies the result
pub struct AcknowledgeOperation {
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl AcknowledgeOperation {
    /// Create the operation
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self { diagnostics }
    }

    /// Map a broker error onto a retry decision
    ///
    /// The unknown-delivery-tag close means the broker already dropped the
    /// delivery, so it resolves the item instead of failing it.
    pub fn classify(&self, item: &WorkItem, error: &ChannelError) -> AttemptOutcome {
        if error.is_unknown_delivery_tag() {
            self.diagnostics.record(
                DiagnosticEvent::new(
                    Severity::Info,
                    DiagnosticKind::UnknownDeliveryTag,
                    format!(
                        "Encountered an unknown delivery tag, discarding the envelope {}",
                        item.message_id
                    ),
                )
                .with_executor(item.kind.name())
                .with_message_id(Some(item.message_id.clone())),
            );
            return AttemptOutcome::Resolved(Resolution::AlreadySettled);
        }

        if error.is_transient() {
            AttemptOutcome::Transient(error.to_string())
        } else {
            AttemptOutcome::Fatal(error.to_string())
        }
    }
}

#[async_trait]
impl RetryOperation<WorkItem> for AcknowledgeOperation {
    async fn execute(&self, item: &WorkItem, _shutdown: &ShutdownSignal) -> AttemptOutcome {
        let channel = item.handle.channel();
        let delivery_tag = item.handle.delivery_tag();

        let result = match item.kind {
            OutcomeKind::Complete => channel.ack(delivery_tag).await,
            OutcomeKind::Defer => channel.nack(delivery_tag, true).await,
            OutcomeKind::DeadLetter => channel.nack(delivery_tag, false).await,
        };

        match result {
            Ok(()) => {
                debug!(
                    message_id = %item.message_id,
                    delivery_tag = delivery_tag,
                    channel_id = channel.channel_id(),
                    outcome = %item.kind,
                    reason = ?item.reason,
                    "Delivery settled"
                );
                AttemptOutcome::applied()
            }
            Err(error) => self.classify(item, &error),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Outcome operations for received messages
///
/// Pipelines depend on this trait rather than on a concrete coordinator.
#[async_trait]
pub trait MessageOutcomes: Send + Sync {
    /// Processing succeeded; remove the message
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), DispatchError>;

    /// Return the message for redelivery
    async fn defer(&self, message: &ReceivedMessage) -> Result<(), DispatchError>;

    /// Reject the message to the dead-letter destination
    async fn move_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
    ) -> Result<(), DispatchError>;

    /// Check if the broker dead-letters rejected messages itself
    ///
    /// When true, callers must not additionally dead-letter at application level.
    fn native_dead_letter_enabled(&self) -> bool;
}

/// Serialized, retrying acknowledgment dispatcher for one broker session
///
/// # Examples
///
/// ```rust
/// use ack_dispatch::{
///     AckCoordinator, DispatcherConfig, InMemoryChannel, MessageId, Receipt, ReceivedMessage,
///     SharedChannel, ShutdownSignal, TracingDiagnostics,
/// };
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let channel = Arc::new(InMemoryChannel::new(1));
/// let shared = SharedChannel::new(channel.clone());
/// let coordinator = AckCoordinator::new(
///     &DispatcherConfig::default(),
///     Arc::new(TracingDiagnostics),
///     ShutdownSignal::never(),
/// );
///
/// let tag = channel.deliver();
/// let message = ReceivedMessage::new(MessageId::new(), "hello".into(), Receipt::Amqp(shared.handle(tag)));
/// coordinator.complete(&message).await.unwrap();
/// assert_eq!(channel.acknowledged(), vec![tag]);
///
/// coordinator.dispose().await;
/// # });
/// ```
pub struct AckCoordinator {
    complete: OrderedRetryExecutor<WorkItem>,
    defer: OrderedRetryExecutor<WorkItem>,
    dead_letter: OrderedRetryExecutor<WorkItem>,
    diagnostics: Arc<dyn DiagnosticSink>,
    native_dead_letter: bool,
}

impl AckCoordinator {
    /// Create a coordinator and start its three executors
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Retry, capacity and dead-letter settings
    /// * `diagnostics` - Sink for mismatch, race and retry records
    /// * `shutdown` - Session cancellation; stops retries in all executors
    pub fn new(
        config: &DispatcherConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let operation: Arc<dyn RetryOperation<WorkItem>> =
            Arc::new(AcknowledgeOperation::new(Arc::clone(&diagnostics)));

        let spawn = |kind: OutcomeKind| {
            OrderedRetryExecutor::spawn(
                config.executor_settings(kind.name()),
                Arc::clone(&operation),
                Arc::clone(&diagnostics),
                shutdown.clone(),
            )
        };

        let coordinator = Self {
            complete: spawn(OutcomeKind::Complete),
            defer: spawn(OutcomeKind::Defer),
            dead_letter: spawn(OutcomeKind::DeadLetter),
            diagnostics: Arc::clone(&diagnostics),
            native_dead_letter: config.native_dead_letter,
        };

        debug!(
            native_dead_letter = config.native_dead_letter,
            max_attempts = config.retry.max_attempts,
            "Acknowledgment coordinator started"
        );

        coordinator
    }

    /// Acknowledge successful processing
    pub async fn complete(&self, message: &ReceivedMessage) -> Result<(), DispatchError> {
        self.dispatch(message, OutcomeKind::Complete, None).await
    }

    /// Return the message to the queue for redelivery
    pub async fn defer(&self, message: &ReceivedMessage) -> Result<(), DispatchError> {
        self.dispatch(message, OutcomeKind::Defer, None).await
    }

    /// Reject the message so the broker routes it to its dead-letter destination
    pub async fn move_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
    ) -> Result<(), DispatchError> {
        self.dispatch(message, OutcomeKind::DeadLetter, Some(reason))
            .await
    }

    /// Check if the broker dead-letters rejected messages itself
    pub fn native_dead_letter_enabled(&self) -> bool {
        self.native_dead_letter
    }

    /// Check if the coordinator has been disposed
    pub fn is_disposed(&self) -> bool {
        OutcomeKind::ALL
            .iter()
            .all(|kind| self.executor(*kind).is_disposed())
    }

    /// Dispose the three executors in turn
    ///
    /// Safe to call repeatedly.
    pub async fn dispose(&self) {
        for kind in OutcomeKind::ALL {
            self.executor(kind).dispose().await;
        }
        debug!("Acknowledgment coordinator disposed");
    }

    fn executor(&self, kind: OutcomeKind) -> &OrderedRetryExecutor<WorkItem> {
        match kind {
            OutcomeKind::Complete => &self.complete,
            OutcomeKind::Defer => &self.defer,
            OutcomeKind::DeadLetter => &self.dead_letter,
        }
    }

    #[instrument(
        skip(self, message),
        fields(message_id = %message.message_id, outcome = %kind)
    )]
    async fn dispatch(
        &self,
        message: &ReceivedMessage,
        kind: OutcomeKind,
        reason: Option<&str>,
    ) -> Result<(), DispatchError> {
        let Some(handle) = message.as_delivery_handle() else {
            self.diagnostics.record(
                DiagnosticEvent::new(
                    Severity::Debug,
                    DiagnosticKind::KindMismatch,
                    format!(
                        "Message {} arrived over '{}' and cannot be settled here; skipping {}",
                        message.message_id,
                        message.transport(),
                        kind
                    ),
                )
                .with_executor(kind.name())
                .with_message_id(Some(message.message_id.clone())),
            );
            return Ok(());
        };

        let mut item = WorkItem::new(handle.clone(), kind, message.message_id.clone());
        if let Some(reason) = reason {
            item = item.with_reason(reason);
        }

        let settlement = self.executor(kind).post(item).await?;

        debug!(
            attempts = settlement.attempts,
            resolution = ?settlement.resolution,
            "Outcome applied"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageOutcomes for AckCoordinator {
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), DispatchError> {
        AckCoordinator::complete(self, message).await
    }

    async fn defer(&self, message: &ReceivedMessage) -> Result<(), DispatchError> {
        AckCoordinator::defer(self, message).await
    }

    async fn move_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
    ) -> Result<(), DispatchError> {
        AckCoordinator::move_to_dead_letter(self, message, reason).await
    }

    fn native_dead_letter_enabled(&self) -> bool {
        AckCoordinator::native_dead_letter_enabled(self)
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
