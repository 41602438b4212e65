//! Coordinators built from loaded configuration

mod common;

use ack_dispatch::{ChannelOperation, DispatchError, DispatcherConfig, InMemoryChannel};
use common::TestSession;
use std::io::Write;

fn load_yaml(contents: &str) -> DispatcherConfig {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");

    DispatcherConfig::load(Some(file.path())).expect("config should load")
}

/// Verify that the attempt budget and dead-letter flag come from the file.
#[tokio::test(start_paused = true)]
async fn test_file_configuration_drives_coordinator() {
    let config = load_yaml(
        "retry:\n  max_attempts: 4\n  initial_delay_ms: 20\n  max_delay_ms: 80\n  use_jitter: false\nnative_dead_letter: false\nqueue_capacity: 2\n",
    );
    let session = TestSession::start(InMemoryChannel::new(1), &config);
    let message = session.receive();
    session.channel.close("CONNECTION_FORCED - broker forced connection closure");

    let error = session.coordinator.complete(&message).await.unwrap_err();

    assert!(matches!(error, DispatchError::Exhausted { attempts: 4, .. }));
    assert_eq!(session.channel.call_count(ChannelOperation::Ack), 4);
    assert!(!session.coordinator.native_dead_letter_enabled());
}

/// Verify that the executors use the configured backoff between attempts.
#[tokio::test(start_paused = true)]
async fn test_configured_backoff_is_applied() {
    let config = load_yaml(
        "retry:\n  max_attempts: 3\n  initial_delay_ms: 100\n  max_delay_ms: 1000\n  backoff_multiplier: 3.0\n  use_jitter: false\n",
    );
    let session = TestSession::start(InMemoryChannel::new(1), &config);
    let message = session.receive();
    session.channel.close("CONNECTION_FORCED - broker forced connection closure");

    let started = tokio::time::Instant::now();
    let _ = session.coordinator.defer(&message).await;

    // 100ms before the second attempt, 300ms before the third
    assert!(started.elapsed() >= std::time::Duration::from_millis(400));
    assert_eq!(session.channel.call_count(ChannelOperation::Requeue), 3);
}
