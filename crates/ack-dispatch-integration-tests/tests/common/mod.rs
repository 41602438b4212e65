//! Common test utilities for ack-dispatch integration tests
//!
//! This module provides:
//! - A session fixture wiring a coordinator to an in-memory channel
//! - A broker channel that fails the first calls for every delivery tag
//! - Message builders for AMQP and foreign transports

use ack_dispatch::{
    AckCoordinator, BrokerChannel, ChannelError, DispatcherConfig, InMemoryChannel,
    MemoryDiagnostics, MessageId, Receipt, ReceivedMessage, SharedChannel, ShutdownSignal,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration with a constant retry delay and no jitter
#[allow(dead_code)]
pub fn fixed_delay_config(max_attempts: u32, delay_ms: u64) -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.retry.max_attempts = max_attempts;
    config.retry.initial_delay_ms = delay_ms;
    config.retry.max_delay_ms = delay_ms;
    config.retry.backoff_multiplier = 1.0;
    config.retry.use_jitter = false;
    config
}

// ============================================================================
// Session Fixture
// ============================================================================

/// A coordinator attached to one broker channel
#[allow(dead_code)]
pub struct TestSession<C: BrokerChannel + 'static> {
    pub channel: Arc<C>,
    pub shared: SharedChannel,
    pub coordinator: AckCoordinator,
    pub diagnostics: Arc<MemoryDiagnostics>,
}

impl<C: BrokerChannel + 'static> TestSession<C> {
    #[allow(dead_code)]
    pub fn start(channel: C, config: &DispatcherConfig) -> Self {
        Self::start_with_signal(channel, config, ShutdownSignal::never())
    }

    #[allow(dead_code)]
    pub fn start_with_signal(channel: C, config: &DispatcherConfig, shutdown: ShutdownSignal) -> Self {
        let channel = Arc::new(channel);
        let shared = SharedChannel::new(channel.clone());
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let coordinator = AckCoordinator::new(config, diagnostics.clone(), shutdown);

        Self {
            channel,
            shared,
            coordinator,
            diagnostics,
        }
    }

    /// Message received on this session's channel with the given tag
    #[allow(dead_code)]
    pub fn message_for_tag(&self, delivery_tag: u64) -> ReceivedMessage {
        amqp_message(&self.shared, delivery_tag)
    }
}

impl TestSession<InMemoryChannel> {
    /// Deliver a new message on the in-memory channel
    #[allow(dead_code)]
    pub fn receive(&self) -> ReceivedMessage {
        let tag = self.channel.deliver();
        self.message_for_tag(tag)
    }
}

// ============================================================================
// Message Builders
// ============================================================================

#[allow(dead_code)]
pub fn amqp_message(channel: &SharedChannel, delivery_tag: u64) -> ReceivedMessage {
    ReceivedMessage::new(
        MessageId::new(),
        r#"{"order":42}"#.into(),
        Receipt::Amqp(channel.handle(delivery_tag)),
    )
}

#[allow(dead_code)]
pub fn foreign_message(transport: &str) -> ReceivedMessage {
    ReceivedMessage::new(
        MessageId::new(),
        r#"{"order":42}"#.into(),
        Receipt::External {
            transport: transport.to_string(),
            token: "opaque-receipt".to_string(),
        },
    )
}

// ============================================================================
// Flaky Broker Channel
// ============================================================================

/// Broker call recorded by [`FlakyChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Ack(u64),
    Nack { delivery_tag: u64, requeue: bool },
}

/// Broker channel that fails the first `failures_per_tag` calls for every tag
/// with a connection error and records every call in order.
#[allow(dead_code)]
pub struct FlakyChannel {
    failures_per_tag: u32,
    attempts: Mutex<HashMap<u64, u32>>,
    calls: Mutex<Vec<Call>>,
}

impl FlakyChannel {
    #[allow(dead_code)]
    pub fn new(failures_per_tag: u32) -> Self {
        Self {
            failures_per_tag,
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn attempts_for(&self, delivery_tag: u64) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&delivery_tag)
            .copied()
            .unwrap_or(0)
    }

    fn settle(&self, call: Call, delivery_tag: u64) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push(call);

        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(delivery_tag).or_insert(0);
        *count += 1;

        if *count <= self.failures_per_tag {
            Err(ChannelError::ConnectionFailed {
                message: format!("connection reset on attempt {}", count),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for FlakyChannel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError> {
        self.settle(Call::Ack(delivery_tag), delivery_tag)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError> {
        self.settle(
            Call::Nack {
                delivery_tag,
                requeue,
            },
            delivery_tag,
        )
    }

    fn channel_id(&self) -> u16 {
        9
    }
}
