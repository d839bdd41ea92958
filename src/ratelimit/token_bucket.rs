//! Token bucket admission with lazy refill.

use tracing::trace;

use super::UsageState;
use crate::policy::Policy;

const MILLIS_PER_SECOND: u128 = 1_000;

/// Stateless token bucket algorithm.
///
/// Tokens are integers. Fractional refill is never accumulated in the token
/// count; instead `last_refill_at` is advanced only by the time that bought
/// whole tokens, so the remainder carries over to the next call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBucketLimiter;

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self
    }

    /// Refill `state` up to `now`, then try to take one token.
    ///
    /// On deny the state may still have changed through refill bookkeeping,
    /// so callers persist it either way.
    pub fn admit(&self, state: &mut UsageState, policy: &Policy, now: i64) -> bool {
        self.refill(state, policy, now);

        if state.tokens >= 1 {
            state.tokens -= 1;
            trace!(key = %state.key, tokens = state.tokens, "Token taken");
            true
        } else {
            trace!(key = %state.key, "Bucket empty");
            false
        }
    }

    /// Credit whole tokens earned since `last_refill_at`.
    pub fn refill(&self, state: &mut UsageState, policy: &Policy, now: i64) {
        if policy.refill_rate == 0 {
            return;
        }

        // Clock skew can put `now` behind the last refill; treat it as no time passed.
        let elapsed = now.saturating_sub(state.last_refill_at).max(0) as u128;
        let rate = policy.refill_rate as u128;

        let tokens_to_add = elapsed * rate / MILLIS_PER_SECOND;
        if tokens_to_add == 0 {
            return;
        }

        // Rounded up so a credited token is always paid for by a whole
        // millisecond. Still <= elapsed, so this cannot pass `now`.
        let credited_millis = (tokens_to_add * MILLIS_PER_SECOND).div_ceil(rate);
        let tokens = (state.tokens as u128 + tokens_to_add).min(policy.capacity as u128);

        state.tokens = tokens as u64;
        state.last_refill_at += credited_millis as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_refill_monotonicity() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 10, 1);
        let mut state = UsageState {
            key: "k".to_string(),
            tokens: 5,
            last_refill_at: T0,
        };

        for _ in 0..5 {
            assert!(limiter.admit(&mut state, &policy, T0));
        }
        assert_eq!(state.tokens, 0);
        assert!(!limiter.admit(&mut state, &policy, T0));

        assert!(limiter.admit(&mut state, &policy, T0 + 1_000));
        assert_eq!(state.tokens, 0);
        assert!(!limiter.admit(&mut state, &policy, T0 + 1_000));
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 3, 100);
        let mut state = UsageState::seed("k", 3, T0);
        limiter.admit(&mut state, &policy, T0);

        limiter.refill(&mut state, &policy, T0 + 3_600_000);
        assert_eq!(state.tokens, 3);
        assert!(state.last_refill_at <= T0 + 3_600_000);
    }

    #[test]
    fn test_partial_intervals_do_not_drift() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 10, 3);
        let mut state = UsageState {
            key: "k".to_string(),
            tokens: 0,
            last_refill_at: T0,
        };

        // 500ms at 3/s earns 1 token and leaves 166ms of credit behind
        limiter.refill(&mut state, &policy, T0 + 500);
        assert_eq!(state.tokens, 1);
        assert_eq!(state.last_refill_at, T0 + 334);

        limiter.refill(&mut state, &policy, T0 + 1_001);
        assert_eq!(state.tokens, 3);
        assert_eq!(state.last_refill_at, T0 + 1_001);
    }

    #[test]
    fn test_fast_refill_cannot_repeat_within_a_millisecond() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 1, 1_500);
        let mut state = UsageState::seed("k", 1, T0);
        assert!(limiter.admit(&mut state, &policy, T0));

        let admitted = (0..1_000)
            .filter(|_| limiter.admit(&mut state, &policy, T0 + 1))
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(state.last_refill_at, T0 + 1);
    }

    #[test]
    fn test_refill_never_outpaces_rate() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 10_000, 2_500);
        let mut state = UsageState {
            key: "k".to_string(),
            tokens: 0,
            last_refill_at: T0,
        };

        let mut admitted = 0;
        for ms in 0..=1_000 {
            for _ in 0..5 {
                if limiter.admit(&mut state, &policy, T0 + ms) {
                    admitted += 1;
                }
            }
        }
        assert!(admitted <= 2_500, "admitted {}", admitted);
    }

    #[test]
    fn test_sub_token_steps_accumulate() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 10, 1);
        let mut state = UsageState {
            key: "k".to_string(),
            tokens: 0,
            last_refill_at: T0,
        };

        for step in 1..=4 {
            limiter.refill(&mut state, &policy, T0 + step * 250 - 1);
            assert_eq!(state.tokens, 0);
            assert_eq!(state.last_refill_at, T0);
        }
        limiter.refill(&mut state, &policy, T0 + 1_000);
        assert_eq!(state.tokens, 1);
        assert_eq!(state.last_refill_at, T0 + 1_000);
    }

    #[test]
    fn test_zero_refill_rate_never_refills() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 2, 0);
        let mut state = UsageState::seed("k", 2, T0);

        assert!(limiter.admit(&mut state, &policy, T0));
        assert!(limiter.admit(&mut state, &policy, T0));
        assert!(!limiter.admit(&mut state, &policy, T0 + 86_400_000));
        assert_eq!(state.last_refill_at, T0);
    }

    #[test]
    fn test_clock_skew_is_clamped() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 5, 10);
        let mut state = UsageState {
            key: "k".to_string(),
            tokens: 1,
            last_refill_at: T0,
        };

        assert!(limiter.admit(&mut state, &policy, T0 - 60_000));
        assert_eq!(state.tokens, 0);
        assert_eq!(state.last_refill_at, T0);
        assert!(!limiter.admit(&mut state, &policy, T0 - 1));
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let limiter = TokenBucketLimiter::new();
        let policy = Policy::token_bucket("k", 4, 7);
        let mut state = UsageState::seed("k", 4, T0);
        let mut now = T0;
        let mut last_refill = state.last_refill_at;

        // Irregular steps, some backwards
        for step in [0, 13, 400, -50, 1, 999, 0, 3_000, -10_000, 142, 7, 60_000] {
            now += step;
            limiter.admit(&mut state, &policy, now);
            assert!(state.tokens <= policy.capacity);
            assert!(state.last_refill_at >= last_refill);
            last_refill = state.last_refill_at;
        }
    }
}
