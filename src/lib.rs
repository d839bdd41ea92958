//! ThrottleX - per-key rate limiting engine
//!
//! This crate decides whether a caller, identified by a string key, may
//! perform one more operation. Each key is governed by a policy selecting
//! either a token bucket or a sliding window; keys without a persisted policy
//! use a process-wide default. [`AdmissionGate::check`] is the single entry
//! point, safe to call from any number of concurrent tasks.

pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod ratelimit;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, ThrottleError};
pub use policy::{AlgorithmKind, Policy, PolicyResolver};
pub use ratelimit::AdmissionGate;
