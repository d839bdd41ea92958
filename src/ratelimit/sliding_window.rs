//! Sliding window admission over per-second buckets.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::Result;
use crate::policy::Policy;
use crate::storage::WindowStore;

/// Sliding window limiter.
///
/// A key's window at second `s` is the inclusive range
/// `[s - window_seconds + 1, s]`. A request is admitted while the sum of the
/// buckets in that range is below capacity, and is then counted in bucket `s`.
///
/// The check and the increment are two store calls, so concurrent callers for
/// the same key must be serialised by the caller. [`AdmissionGate`] holds the
/// key's lock around every call.
///
/// [`AdmissionGate`]: super::AdmissionGate
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
}

/// The inclusive bucket range of a window ending at `now`.
fn window_bounds(policy: &Policy, now: i64) -> (i64, i64) {
    let now_second = now.div_euclid(1000);
    let window = policy.window_seconds.max(1).min(i64::MAX as u64) as i64;
    (now_second.saturating_sub(window - 1), now_second)
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Admit one request for `key` at `now` (epoch millis), recording it if
    /// admitted.
    pub async fn admit(&self, key: &str, policy: &Policy, now: i64) -> Result<bool> {
        let (window_start, now_second) = window_bounds(policy, now);

        let used = self.store.sum_buckets(key, window_start, now_second).await?;
        if used >= policy.capacity {
            trace!(key = %key, used = used, capacity = policy.capacity, "Window full");
            return Ok(false);
        }

        self.store.increment_bucket(key, now_second).await?;

        // Buckets before the window no longer count; removing them is housekeeping.
        if let Err(e) = self.store.delete_buckets_before(key, window_start).await {
            debug!(key = %key, error = %e, "Failed to prune expired buckets");
        }

        trace!(key = %key, used = used + 1, capacity = policy.capacity, "Request recorded");
        Ok(true)
    }

    /// Requests counted in the window ending at `now`.
    pub async fn window_count(&self, key: &str, policy: &Policy, now: i64) -> Result<u64> {
        let (window_start, now_second) = window_bounds(policy, now);
        self.store.sum_buckets(key, window_start, now_second).await
    }

    /// Forget all recorded requests for `key`.
    pub async fn clear(&self, key: &str) -> Result<()> {
        self.store.delete_buckets_before(key, i64::MAX).await
    }
}
