use foreman_core::resilience::RetryPolicy;
use proptest::prelude::*;
use std::time::Duration;

fn policy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..500, 1u64..60_000, 0.0f64..=1.0).prop_map(|(base_ms, max_ms, jitter)| {
        RetryPolicy::new(5, Duration::from_millis(base_ms), Duration::from_millis(max_ms))
            .with_jitter(jitter)
    })
}

proptest! {
    #[test]
    fn delay_never_exceeds_max(policy in policy(), attempt in 1u32..64) {
        prop_assert!(policy.delay_for(attempt) <= policy.max_delay);
    }

    #[test]
    fn jitter_only_adds(policy in policy(), attempt in 1u32..64) {
        prop_assert!(policy.delay_for(attempt) >= policy.base_delay_for(attempt));
    }

    #[test]
    fn delays_are_non_decreasing(policy in policy(), attempt in 1u32..63) {
        prop_assert!(policy.delay_for(attempt) <= policy.delay_for(attempt + 1));
    }

    #[test]
    fn zero_jitter_is_deterministic(base_ms in 1u64..500, attempt in 1u32..64) {
        let policy = RetryPolicy::new(5, Duration::from_millis(base_ms), Duration::from_secs(30))
            .with_jitter(0.0);
        prop_assert_eq!(policy.delay_for(attempt), policy.base_delay_for(attempt));
    }
}
