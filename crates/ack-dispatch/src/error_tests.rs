//! Tests for error types.

use super::*;

#[test]
fn test_channel_error_transience() {
    assert!(ChannelError::AlreadyClosed {
        reason: "connection reset".to_string(),
    }
    .is_transient());

    assert!(ChannelError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(ChannelError::Timeout {
        duration: Duration::from_secs(5),
    }
    .is_transient());

    assert!(!ChannelError::Unsupported {
        operation: "nack".to_string(),
    }
    .is_transient());
}

#[test]
fn test_unknown_delivery_tag_detection() {
    let closed = ChannelError::AlreadyClosed {
        reason: "The AMQP operation was interrupted: AMQP close-reason, initiated by Peer, \
                 code=406, text='PRECONDITION_FAILED - unknown delivery tag 1', classId=60, methodId=80"
            .to_string(),
    };
    assert!(closed.is_unknown_delivery_tag());

    let other_close = ChannelError::AlreadyClosed {
        reason: "code=320, text='CONNECTION_FORCED - broker forced connection closure'".to_string(),
    };
    assert!(!other_close.is_unknown_delivery_tag());
}

#[test]
fn test_unknown_delivery_tag_requires_closed_channel() {
    let error = ChannelError::ConnectionFailed {
        message: UNKNOWN_DELIVERY_TAG.to_string(),
    };
    assert!(!error.is_unknown_delivery_tag());
}

#[test]
fn test_dispatch_error_accessors() {
    let exhausted = DispatchError::Exhausted {
        executor: "complete".to_string(),
        attempts: 3,
        last_error: "Connection failed: reset".to_string(),
    };
    assert_eq!(exhausted.executor(), "complete");
    assert!(exhausted.is_exhausted());
    assert_eq!(
        exhausted.to_string(),
        "Gave up on 'complete' after 3 attempts: Connection failed: reset"
    );

    let disposed = DispatchError::Disposed {
        executor: "defer".to_string(),
    };
    assert_eq!(disposed.executor(), "defer");
    assert!(!disposed.is_exhausted());
}
