//! Rate limiting algorithms, usage state and the admission gate.

mod dispatcher;
mod gate;
mod locks;
mod sliding_window;
mod state;
mod token_bucket;

pub use dispatcher::LimiterDispatcher;
pub use gate::{AdmissionGate, UsageSnapshot};
pub use sliding_window::SlidingWindowLimiter;
pub use state::UsageState;
pub use token_bucket::TokenBucketLimiter;
