//! Per-key usage state.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThrottleError};
use crate::policy::{AlgorithmKind, Policy};

/// Mutable counters for one key.
///
/// `tokens` is only meaningful for token bucket policies, but every key that
/// has been checked gets a record so resets and metrics see a uniform shape.
/// Sliding window history lives in the window store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub key: String,
    /// Remaining tokens, never above the policy capacity
    pub tokens: u64,
    /// Epoch milliseconds up to which refill has been credited
    pub last_refill_at: i64,
}

impl UsageState {
    /// A full bucket as of `now`.
    pub fn seed(key: impl Into<String>, capacity: u64, now: i64) -> Self {
        Self {
            key: key.into(),
            tokens: capacity,
            last_refill_at: now,
        }
    }

    /// Check the state against the policy it is about to be evaluated with.
    ///
    /// Token counts are only checked for token bucket policies.
    pub fn validate(&self, policy: &Policy) -> Result<()> {
        if self.key != policy.key {
            return Err(ThrottleError::StateCorruption(format!(
                "state key {} does not match policy key {}",
                self.key, policy.key
            )));
        }
        if policy.kind == AlgorithmKind::TokenBucket && self.tokens > policy.capacity {
            return Err(ThrottleError::StateCorruption(format!(
                "{} tokens exceed capacity {} for key {}",
                self.tokens, policy.capacity, self.key
            )));
        }
        Ok(())
    }
}
