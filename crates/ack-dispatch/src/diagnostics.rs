//! Diagnostic records emitted by the executor and the coordinator.
//!
//! Records go through a [`DiagnosticSink`] so callers can route them to
//! `tracing` ([`TracingDiagnostics`]) or capture them for inspection
//! ([`MemoryDiagnostics`]).

use crate::message::MessageId;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Severity of a diagnostic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// What a diagnostic record is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// A message from another transport was handed to the coordinator
    KindMismatch,
    /// The broker no longer knew the delivery tag; treated as settled
    UnknownDeliveryTag,
    /// A transient failure will be retried after a delay
    RetryScheduled,
    /// The retry budget ran out
    RetriesExhausted,
    /// The operation reported a failure that must not be retried
    NonRetryableFailure,
    /// Work was abandoned because the executor was cancelled
    Cancelled,
    /// Disposal gave up waiting for the processing loop
    ShutdownTimedOut,
}

/// A single diagnostic record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub executor: Option<String>,
    pub message_id: Option<MessageId>,
    pub attempt: Option<u32>,
    pub detail: String,
}

impl DiagnosticEvent {
    /// Create new diagnostic record
    pub fn new(severity: Severity, kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            executor: None,
            message_id: None,
            attempt: None,
            detail: detail.into(),
        }
    }

    /// Attach the name of the executor that produced the record
    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    /// Attach the message the record is about
    pub fn with_message_id(mut self, message_id: Option<MessageId>) -> Self {
        self.message_id = message_id;
        self
    }

    /// Attach the attempt number the record refers to
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Destination for diagnostic records
pub trait DiagnosticSink: Send + Sync {
    /// Record a diagnostic event
    fn record(&self, event: DiagnosticEvent);
}

/// Forwards diagnostic records to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn record(&self, event: DiagnosticEvent) {
        let message_id = event.message_id.as_ref().map(MessageId::as_str);
        let executor = event.executor.as_deref();

        match event.severity {
            Severity::Debug => debug!(
                kind = ?event.kind,
                executor = ?executor,
                message_id = ?message_id,
                attempt = ?event.attempt,
                "{}",
                event.detail
            ),
            Severity::Info => info!(
                kind = ?event.kind,
                executor = ?executor,
                message_id = ?message_id,
                attempt = ?event.attempt,
                "{}",
                event.detail
            ),
            Severity::Warn => warn!(
                kind = ?event.kind,
                executor = ?executor,
                message_id = ?message_id,
                attempt = ?event.attempt,
                "{}",
                event.detail
            ),
            Severity::Error => error!(
                kind = ?event.kind,
                executor = ?executor,
                message_id = ?message_id,
                attempt = ?event.attempt,
                "{}",
                event.detail
            ),
        }
    }
}

/// Keeps diagnostic records in memory, for tests and simulations
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemoryDiagnostics {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, in recording order
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.lock().clone()
    }

    /// Number of recorded events of the given kind
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Number of recorded events at the given severity
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.lock().iter().filter(|e| e.severity == severity).count()
    }

    /// Recorded events that mention the given message
    pub fn for_message(&self, message_id: &MessageId) -> Vec<DiagnosticEvent> {
        self.lock()
            .iter()
            .filter(|e| e.message_id.as_ref() == Some(message_id))
            .cloned()
            .collect()
    }

    /// Total number of recorded events
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DiagnosticEvent>> {
        // A panicking recorder must not hide the records written before it.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DiagnosticSink for MemoryDiagnostics {
    fn record(&self, event: DiagnosticEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
#[path = "diagnostics_tests.rs"]
mod tests;
