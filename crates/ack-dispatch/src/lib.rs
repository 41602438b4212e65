//! # Ack Dispatch
//!
//! Serialized, retrying acknowledgment dispatcher for messages consumed from an
//! AMQP broker.
//!
//! This library provides:
//! - An ordered retry executor that runs one operation per queued item, in
//!   submission order, with bounded exponential backoff
//! - An acknowledgment coordinator with one executor per outcome kind
//!   (complete, defer, dead-letter)
//! - Tolerance for the broker's "unknown delivery tag" race after a channel
//!   closes
//! - A shared channel wrapper that keeps broker calls from interleaving
//! - An in-memory broker channel for tests and simulations
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for dispatch, channel and configuration failures
//! - [`message`] - Received messages, receipts and delivery handles
//! - [`channel`] - Broker channel boundary and the shared channel wrapper
//! - [`channels`] - Channel implementations
//! - [`retry`] - Retry policy and per-item retry state
//! - [`executor`] - The ordered retry executor
//! - [`coordinator`] - The acknowledgment coordinator
//! - [`diagnostics`] - Diagnostic records and sinks
//! - [`shutdown`] - Cancellation signals
//! - [`config`] - Dispatcher configuration

// Module declarations
pub mod channel;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod message;
pub mod retry;
pub mod shutdown;

// Re-export commonly used types at crate root for convenience
pub use channel::{BrokerChannel, SharedChannel};
pub use channels::{ChannelOperation, InMemoryChannel};
pub use config::{DispatcherConfig, RetryConfig};
pub use coordinator::{AckCoordinator, AcknowledgeOperation, MessageOutcomes, OutcomeKind, WorkItem};
pub use diagnostics::{
    DiagnosticEvent, DiagnosticKind, DiagnosticSink, MemoryDiagnostics, Severity,
    TracingDiagnostics,
};
pub use error::{ChannelError, ConfigurationError, DispatchError, ValidationError};
pub use executor::{
    AttemptOutcome, Correlated, ExecutorSettings, OrderedRetryExecutor, Resolution,
    RetryOperation, Settlement, WorkState,
};
pub use message::{DeliveryHandle, MessageId, Receipt, ReceivedMessage};
pub use retry::{RetryPolicy, RetryState};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
