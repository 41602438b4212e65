//! # Ordered Retry Executor
//!
//! A single-queue work processor. Items posted to an executor are executed one
//! at a time, in the order they were accepted, by the operation the executor was
//! built with. Transient failures are retried according to a [`RetryPolicy`];
//! the caller's `post` future resolves once the item has settled.
//!
//! The executor knows nothing about brokers. The operation classifies each
//! attempt with an [`AttemptOutcome`] and the retry decision is made purely from
//! that tag:
//!
//! - `Resolved` settles the item, whatever the attempt count
//! - `Transient` is retried with backoff until the budget runs out
//! - `Fatal` fails the item immediately
//!
//! Per item state machine:
//!
//! ```text
//! Pending -> Executing -> Succeeded
//!                      -> RetryScheduled -> Executing
//!                      -> Exhausted | Failed | Cancelled
//! ```

use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink, Severity};
use crate::error::DispatchError;
use crate::message::MessageId;
use crate::retry::{RetryPolicy, RetryState};
use crate::shutdown::{ShutdownSignal, ShutdownTrigger};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

// ============================================================================
// Outcome Types
// ============================================================================

/// How a settled item was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The operation took effect
    Applied,
    /// The operation was unnecessary because the item was already settled
    AlreadySettled,
}

/// Classification of a single execution of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The item is settled; stop processing it
    Resolved(Resolution),
    /// The attempt failed in a way that may succeed later
    Transient(String),
    /// The attempt failed in a way retrying cannot fix
    Fatal(String),
}

impl AttemptOutcome {
    /// Shorthand for a successful attempt
    pub fn applied() -> Self {
        Self::Resolved(Resolution::Applied)
    }
}

/// Lifecycle of a work item inside an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Pending,
    Executing,
    RetryScheduled,
    Succeeded,
    Exhausted,
    Failed,
    Cancelled,
}

impl WorkState {
    /// Check if the item has left the executor
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::Failed | Self::Cancelled
        )
    }
}

/// Result of a successfully settled item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Executions it took to settle the item
    pub attempts: u32,
    /// How the item was resolved
    pub resolution: Resolution,
}

// ============================================================================
// Extension Points
// ============================================================================

/// Items that can be tied to a message in diagnostic records
pub trait Correlated {
    /// Message the item concerns, if any
    fn message_id(&self) -> Option<&MessageId>;
}

/// The operation an executor performs for each item
#[async_trait]
pub trait RetryOperation<T>: Send + Sync {
    /// Execute the operation once and classify the result.
    ///
    /// `shutdown` fires when the executor is cancelled; an attempt already in
    /// progress is allowed to finish.
    async fn execute(&self, item: &T, shutdown: &ShutdownSignal) -> AttemptOutcome;
}

/// Construction settings for an executor
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Name used in errors and diagnostics
    pub name: String,
    /// Retry policy for transient failures
    pub retry_policy: RetryPolicy,
    /// Maximum pending items; `None` means unbounded
    pub queue_capacity: Option<usize>,
    /// How long disposal waits for the processing loop to stop
    pub shutdown_timeout: Duration,
}

impl ExecutorSettings {
    /// Create settings with default policy, unbounded queue and a 5s shutdown wait
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry_policy: RetryPolicy::default(),
            queue_capacity: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Bound the number of pending items
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the disposal wait
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ============================================================================
// Executor
// ============================================================================

struct Job<T> {
    item: T,
    reply: oneshot::Sender<Result<Settlement, DispatchError>>,
    _slot: Option<OwnedSemaphorePermit>,
}

/// Ordered, retrying, single-queue executor
///
/// Must be created inside a Tokio runtime; the processing loop runs as a
/// spawned task.
pub struct OrderedRetryExecutor<T> {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop: ShutdownTrigger,
    slots: Option<Arc<Semaphore>>,
    shutdown_timeout: Duration,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<T> OrderedRetryExecutor<T>
where
    T: Correlated + Send + Sync + 'static,
{
    /// Start an executor
    ///
    /// # Arguments
    ///
    /// * `settings` - Name, retry policy, capacity and shutdown wait
    /// * `operation` - Operation executed for every item
    /// * `diagnostics` - Sink for retry and failure records
    /// * `shutdown` - Owner's cancellation signal
    pub fn spawn(
        settings: ExecutorSettings,
        operation: Arc<dyn RetryOperation<T>>,
        diagnostics: Arc<dyn DiagnosticSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = ShutdownTrigger::new();

        let processing = ProcessingLoop {
            name: settings.name.clone(),
            operation,
            policy: settings.retry_policy,
            diagnostics: Arc::clone(&diagnostics),
            signal: shutdown.linked_with(&stop.signal()),
        };
        let worker = tokio::spawn(processing.run(receiver));

        debug!(
            executor = %settings.name,
            queue_capacity = ?settings.queue_capacity,
            "Started ordered retry executor"
        );

        Self {
            name: settings.name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            stop,
            slots: settings
                .queue_capacity
                .map(|capacity| Arc::new(Semaphore::new(capacity))),
            shutdown_timeout: settings.shutdown_timeout,
            diagnostics,
        }
    }

    /// Executor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Enqueue an item and wait until it settles
    ///
    /// Items are executed in the order their posts were accepted. Posting after
    /// `dispose` fails with [`DispatchError::Disposed`]; items still queued when
    /// the executor is cancelled fail with [`DispatchError::Cancelled`].
    pub async fn post(&self, item: T) -> Result<Settlement, DispatchError> {
        let slot = match &self.slots {
            Some(slots) => Some(
                Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| self.disposed_error())?,
            ),
            None => None,
        };

        let (reply, settled) = oneshot::channel();
        {
            let sender = lock(&self.sender);
            let sender = sender.as_ref().ok_or_else(|| self.disposed_error())?;
            sender
                .send(Job {
                    item,
                    reply,
                    _slot: slot,
                })
                .map_err(|_| self.cancelled_error())?;
        }

        settled.await.unwrap_or_else(|_| Err(self.cancelled_error()))
    }

    /// Stop accepting posts, cancel outstanding work and wait for the loop to
    /// stop, at most for the configured shutdown timeout.
    ///
    /// A loop still busy when the wait runs out is detached rather than
    /// aborted, so an attempt already talking to the broker completes and its
    /// caller receives the real result. Safe to call repeatedly.
    pub async fn dispose(&self) {
        let sender = lock(&self.sender).take();
        drop(sender);

        self.stop.trigger();
        if let Some(slots) = &self.slots {
            slots.close();
        }

        let worker = lock(&self.worker).take();
        let Some(worker) = worker else {
            return;
        };

        match tokio::time::timeout(self.shutdown_timeout, worker).await {
            Ok(Ok(())) => {
                debug!(executor = %self.name, "Ordered retry executor stopped");
            }
            Ok(Err(error)) => {
                warn!(
                    executor = %self.name,
                    error = %error,
                    "Ordered retry executor loop ended abnormally"
                );
            }
            Err(_) => {
                // The elapsed timeout dropped the handle; the task runs on detached
                self.diagnostics.record(
                    DiagnosticEvent::new(
                        Severity::Warn,
                        DiagnosticKind::ShutdownTimedOut,
                        format!(
                            "Executor did not stop within {}ms; leaving its current attempt to finish",
                            self.shutdown_timeout.as_millis()
                        ),
                    )
                    .with_executor(self.name.clone()),
                );
            }
        }
    }

    fn disposed_error(&self) -> DispatchError {
        DispatchError::Disposed {
            executor: self.name.clone(),
        }
    }

    fn cancelled_error(&self) -> DispatchError {
        DispatchError::Cancelled {
            executor: self.name.clone(),
        }
    }
}

impl<T> Drop for OrderedRetryExecutor<T> {
    fn drop(&mut self) {
        lock(&self.sender).take();
        self.stop.trigger();
        if let Some(slots) = &self.slots {
            slots.close();
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Processing Loop
// ============================================================================

struct ProcessingLoop<T> {
    name: String,
    operation: Arc<dyn RetryOperation<T>>,
    policy: RetryPolicy,
    diagnostics: Arc<dyn DiagnosticSink>,
    signal: ShutdownSignal,
}

impl<T> ProcessingLoop<T>
where
    T: Correlated + Send + Sync + 'static,
{
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Job<T>>) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.signal.triggered() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let result = self.settle(&job.item).await;
            // The caller may have stopped waiting; the item is settled either way.
            let _ = job.reply.send(result);
        }

        receiver.close();
        let mut abandoned = 0usize;
        while let Ok(job) = receiver.try_recv() {
            abandoned += 1;
            let _ = job.reply.send(Err(DispatchError::Cancelled {
                executor: self.name.clone(),
            }));
        }

        debug!(
            executor = %self.name,
            abandoned = abandoned,
            "Ordered retry executor loop finished"
        );
    }

    async fn settle(&self, item: &T) -> Result<Settlement, DispatchError> {
        let message_id = item.message_id().cloned();
        let mut retry = RetryState::new();
        self.trace_state(&message_id, WorkState::Pending, retry.attempts);

        loop {
            retry.begin_attempt();
            self.trace_state(&message_id, WorkState::Executing, retry.attempts);

            let detail = match self.operation.execute(item, &self.signal).await {
                AttemptOutcome::Resolved(resolution) => {
                    self.trace_state(&message_id, WorkState::Succeeded, retry.attempts);
                    return Ok(Settlement {
                        attempts: retry.attempts,
                        resolution,
                    });
                }
                AttemptOutcome::Fatal(detail) => {
                    self.trace_state(&message_id, WorkState::Failed, retry.attempts);
                    self.record(
                        Severity::Error,
                        DiagnosticKind::NonRetryableFailure,
                        &message_id,
                        retry.attempts,
                        format!("Operation failed permanently: {}", detail),
                    );
                    return Err(DispatchError::Rejected {
                        executor: self.name.clone(),
                        detail,
                    });
                }
                AttemptOutcome::Transient(detail) => detail,
            };

            retry.record_failure(detail.clone());

            if self.signal.is_triggered() {
                return Err(self.cancel(&message_id, retry.attempts));
            }

            if !retry.can_retry(&self.policy) {
                self.trace_state(&message_id, WorkState::Exhausted, retry.attempts);
                self.record(
                    Severity::Error,
                    DiagnosticKind::RetriesExhausted,
                    &message_id,
                    retry.attempts,
                    format!(
                        "Giving up after {} attempts: {}",
                        retry.attempts, detail
                    ),
                );
                return Err(DispatchError::Exhausted {
                    executor: self.name.clone(),
                    attempts: retry.attempts,
                    last_error: retry.last_error.unwrap_or(detail),
                });
            }

            let delay = retry.next_delay(&self.policy);
            self.trace_state(&message_id, WorkState::RetryScheduled, retry.attempts);
            self.record(
                Severity::Warn,
                DiagnosticKind::RetryScheduled,
                &message_id,
                retry.attempts,
                format!("{}; retrying in {}ms", detail, delay.as_millis()),
            );

            tokio::select! {
                biased;
                _ = self.signal.triggered() => {
                    return Err(self.cancel(&message_id, retry.attempts));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancel(&self, message_id: &Option<MessageId>, attempts: u32) -> DispatchError {
        self.trace_state(message_id, WorkState::Cancelled, attempts);
        self.record(
            Severity::Warn,
            DiagnosticKind::Cancelled,
            message_id,
            attempts,
            "Executor cancelled before the item settled".to_string(),
        );
        DispatchError::Cancelled {
            executor: self.name.clone(),
        }
    }

    fn record(
        &self,
        severity: Severity,
        kind: DiagnosticKind,
        message_id: &Option<MessageId>,
        attempt: u32,
        detail: String,
    ) {
        self.diagnostics.record(
            DiagnosticEvent::new(severity, kind, detail)
                .with_executor(self.name.clone())
                .with_message_id(message_id.clone())
                .with_attempt(attempt),
        );
    }

    fn trace_state(&self, message_id: &Option<MessageId>, state: WorkState, attempt: u32) {
        trace!(
            executor = %self.name,
            message_id = ?message_id.as_ref().map(MessageId::as_str),
            state = ?state,
            terminal = state.is_terminal(),
            attempt = attempt,
            "Work item state"
        );
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
