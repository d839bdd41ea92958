//! Algorithm selection by policy kind.

use std::sync::Arc;

use super::{SlidingWindowLimiter, TokenBucketLimiter, UsageState};
use crate::error::{Result, ThrottleError};
use crate::policy::{AlgorithmKind, Policy};
use crate::storage::WindowStore;

/// Routes an evaluation to the algorithm named by the policy.
pub struct LimiterDispatcher {
    token_bucket: TokenBucketLimiter,
    sliding_window: SlidingWindowLimiter,
}

impl LimiterDispatcher {
    pub fn new(windows: Arc<dyn WindowStore>) -> Self {
        Self {
            token_bucket: TokenBucketLimiter::new(),
            sliding_window: SlidingWindowLimiter::new(windows),
        }
    }

    pub fn sliding_window(&self) -> &SlidingWindowLimiter {
        &self.sliding_window
    }

    /// Evaluate one request against `policy`.
    ///
    /// Unrecognised kinds fail with [`ThrottleError::UnknownAlgorithm`]
    /// rather than falling back to either algorithm.
    pub async fn admit(&self, state: &mut UsageState, policy: &Policy, now: i64) -> Result<bool> {
        match &policy.kind {
            AlgorithmKind::TokenBucket => Ok(self.token_bucket.admit(state, policy, now)),
            AlgorithmKind::SlidingWindow => {
                self.sliding_window.admit(&state.key, policy, now).await
            }
            AlgorithmKind::Unrecognized(tag) => Err(ThrottleError::UnknownAlgorithm(tag.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const T0: i64 = 1_700_000_000_000;

    #[tokio::test]
    async fn test_routes_token_bucket() {
        let dispatcher = LimiterDispatcher::new(Arc::new(MemoryStore::new()));
        let policy = Policy::token_bucket("k", 1, 0);
        let mut state = UsageState::seed("k", 1, T0);

        assert!(dispatcher.admit(&mut state, &policy, T0).await.unwrap());
        assert_eq!(state.tokens, 0);
        assert!(!dispatcher.admit(&mut state, &policy, T0).await.unwrap());
    }

    #[tokio::test]
    async fn test_routes_sliding_window() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = LimiterDispatcher::new(store.clone());
        let policy = Policy::sliding_window("k", 2, 60);
        let mut state = UsageState::seed("k", 2, T0);

        assert!(dispatcher.admit(&mut state, &policy, T0).await.unwrap());
        assert!(dispatcher.admit(&mut state, &policy, T0).await.unwrap());
        assert!(!dispatcher.admit(&mut state, &policy, T0).await.unwrap());

        // Sliding window accounting does not touch the token counter
        assert_eq!(state.tokens, 2);
        assert_eq!(store.sum_buckets("k", 0, i64::MAX).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_algorithm_rejected() {
        let dispatcher = LimiterDispatcher::new(Arc::new(MemoryStore::new()));
        let mut policy = Policy::token_bucket("k", 10, 1);
        policy.kind = AlgorithmKind::from("leaky_bucket");
        let mut state = UsageState::seed("k", 10, T0);

        let err = dispatcher.admit(&mut state, &policy, T0).await.unwrap_err();
        assert!(matches!(err, ThrottleError::UnknownAlgorithm(ref tag) if tag == "leaky_bucket"));
        assert_eq!(state, UsageState::seed("k", 10, T0));
    }
}
