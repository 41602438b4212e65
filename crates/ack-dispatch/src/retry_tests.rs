use super::*;
use std::time::Duration;

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

mod policy {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert!(policy.use_jitter);
        assert_eq!(policy.jitter_percent, 0.25);
    }

    #[test]
    fn test_waits_double_until_the_cap() {
        let policy = RetryPolicy::default().without_jitter();

        let waits: Vec<Duration> = (0..7).map(|retry| policy.delay_for_retry(retry)).collect();

        assert_eq!(
            waits,
            vec![
                millis(100),
                millis(200),
                millis(400),
                millis(800),
                millis(1600),
                millis(2000),
                millis(2000),
            ]
        );
    }

    #[test]
    fn test_jittered_wait_stays_within_band() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(10), 2.0);

        for _ in 0..50 {
            let wait = policy.delay_for_retry(1);
            assert!(
                wait >= millis(1500) && wait <= millis(2500),
                "jittered wait {:?} left the ±25% band around 2s",
                wait
            );
        }
    }

    #[test]
    fn test_huge_retry_number_saturates_at_the_cap() {
        let policy = RetryPolicy::default().without_jitter();

        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(3, millis(250));

        assert!(!policy.use_jitter);
        for retry in [0, 1, 7] {
            assert_eq!(policy.delay_for_retry(retry), millis(250));
        }
        assert_eq!(policy.max_retries(), 2);
    }

    #[test]
    fn test_budget_includes_the_first_attempt() {
        let policy = RetryPolicy::default();

        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(4));
        assert!(!policy.allows_attempt(5));
        assert!(!policy.allows_attempt(6));
    }

    #[test]
    fn test_single_attempt_budget_has_no_retries() {
        let policy = RetryPolicy::fixed(1, millis(10));

        assert!(!policy.allows_attempt(1));
        assert_eq!(policy.max_retries(), 0);
    }

    #[test]
    fn test_zero_attempt_budget_has_no_retries() {
        let policy = RetryPolicy::fixed(0, millis(10));

        assert!(!policy.allows_attempt(0));
        assert_eq!(policy.max_retries(), 0);
    }

    #[test]
    fn test_jitter_fraction_is_clamped() {
        assert_eq!(
            RetryPolicy::default()
                .with_jitter_percent(-0.5)
                .jitter_percent,
            0.0
        );
        assert_eq!(
            RetryPolicy::default().with_jitter_percent(1.5).jitter_percent,
            1.0
        );
    }

    #[test]
    fn test_nan_jitter_fraction_disables_jitter() {
        let policy = RetryPolicy::default().with_jitter_percent(f64::NAN);

        assert_eq!(policy.jitter_percent, 0.0);
        assert_eq!(policy.delay_for_retry(2), millis(400));
    }

    #[test]
    fn test_nan_jitter_field_falls_back_to_exact_wait() {
        let policy = RetryPolicy {
            jitter_percent: f64::NAN,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for_retry(0), millis(100));
    }

    #[test]
    fn test_negative_multiplier_never_yields_negative_wait() {
        let policy = RetryPolicy::new(5, millis(10), Duration::from_secs(1), -2.0);

        for retry in 0..6 {
            let wait = policy.delay_for_retry(retry);
            assert!(wait <= Duration::from_secs(1), "wait {:?} above cap", wait);
        }
        // Odd powers of a negative multiplier clamp to zero
        assert_eq!(policy.without_jitter().delay_for_retry(1), Duration::ZERO);
    }

    #[test]
    fn test_nan_multiplier_waits_the_cap() {
        let policy = RetryPolicy::new(5, millis(10), millis(500), f64::NAN).without_jitter();

        assert_eq!(policy.delay_for_retry(0), millis(500));
        assert_eq!(policy.delay_for_retry(3), millis(500));
    }

    #[test]
    fn test_zero_jitter_fraction_gives_exact_waits() {
        let policy = RetryPolicy::default().with_jitter_percent(0.0);

        assert!(policy.use_jitter);
        assert_eq!(policy.delay_for_retry(1), millis(200));
    }
}

mod state {
    use super::*;

    #[test]
    fn test_fresh_state_is_empty() {
        let state = RetryState::new();

        assert_eq!(state.attempts, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_latest_failure_replaces_the_previous_one() {
        let mut state = RetryState::new();

        state.begin_attempt();
        state.record_failure("Connection failed: reset");
        state.begin_attempt();
        state.record_failure("Operation timed out after 1s");

        assert_eq!(state.attempts, 2);
        assert_eq!(
            state.last_error.as_deref(),
            Some("Operation timed out after 1s")
        );
    }

    #[test]
    fn test_next_wait_tracks_attempts_made() {
        let policy = RetryPolicy::default().without_jitter();
        let mut state = RetryState::new();

        let mut waits = Vec::new();
        for _ in 0..3 {
            state.begin_attempt();
            waits.push(state.next_delay(&policy));
        }

        assert_eq!(waits, vec![millis(100), millis(200), millis(400)]);
    }

    #[test]
    fn test_retry_allowed_until_budget_is_spent() {
        let policy = RetryPolicy::fixed(3, millis(10));
        let mut state = RetryState::new();

        let mut verdicts = Vec::new();
        for _ in 0..3 {
            state.begin_attempt();
            verdicts.push(state.can_retry(&policy));
        }

        assert_eq!(verdicts, vec![true, true, false]);
    }
}
