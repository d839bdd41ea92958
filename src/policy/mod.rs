//! Rate limit policies and their resolution.

mod resolver;
mod rules;

pub use resolver::PolicyResolver;
pub use rules::PolicySet;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ThrottleError};

/// The admission algorithm a policy selects.
///
/// Tags are parsed once at the boundary. Any casing and either `-` or `_` as
/// separator is accepted, so `token-bucket`, `TOKEN_BUCKET` and `Token_Bucket`
/// all name the same algorithm. Tags that match nothing are kept verbatim in
/// [`AlgorithmKind::Unrecognized`] so that evaluation can refuse them instead
/// of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlgorithmKind {
    TokenBucket,
    SlidingWindow,
    Unrecognized(String),
}

impl AlgorithmKind {
    /// Canonical tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            AlgorithmKind::TokenBucket => "TOKEN_BUCKET",
            AlgorithmKind::SlidingWindow => "SLIDING_WINDOW",
            AlgorithmKind::Unrecognized(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, AlgorithmKind::Unrecognized(_))
    }
}

impl From<&str> for AlgorithmKind {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "TOKEN_BUCKET" => AlgorithmKind::TokenBucket,
            "SLIDING_WINDOW" => AlgorithmKind::SlidingWindow,
            _ => AlgorithmKind::Unrecognized(tag.to_string()),
        }
    }
}

impl From<String> for AlgorithmKind {
    fn from(tag: String) -> Self {
        AlgorithmKind::from(tag.as_str())
    }
}

impl From<AlgorithmKind> for String {
    fn from(kind: AlgorithmKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The limiting rule bound to one key.
///
/// Only one of `refill_rate` and `window_seconds` is meaningful, selected by
/// `kind`. The inactive one is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Identifier of the limited subject
    pub key: String,
    /// Algorithm used to evaluate requests
    pub kind: AlgorithmKind,
    /// Bucket size, or maximum requests per window
    pub capacity: u64,
    /// Tokens added per second (token bucket)
    #[serde(default)]
    pub refill_rate: u64,
    /// Window length in seconds (sliding window)
    #[serde(default)]
    pub window_seconds: u64,
}

impl Policy {
    /// Create a token bucket policy.
    pub fn token_bucket(key: impl Into<String>, capacity: u64, refill_rate: u64) -> Self {
        Self {
            key: key.into(),
            kind: AlgorithmKind::TokenBucket,
            capacity,
            refill_rate,
            window_seconds: 0,
        }
    }

    /// Create a sliding window policy.
    pub fn sliding_window(key: impl Into<String>, capacity: u64, window_seconds: u64) -> Self {
        Self {
            key: key.into(),
            kind: AlgorithmKind::SlidingWindow,
            capacity,
            refill_rate: 0,
            window_seconds,
        }
    }

    /// Full boundary validation: the kind must be known and the active
    /// parameters must hold.
    pub fn validate(&self) -> Result<()> {
        if let AlgorithmKind::Unrecognized(tag) = &self.kind {
            return Err(ThrottleError::UnknownAlgorithm(format!(
                "{} (supported: TOKEN_BUCKET, SLIDING_WINDOW)",
                tag
            )));
        }
        self.validate_parameters()
    }

    /// Check the numeric invariants without judging the kind.
    pub fn validate_parameters(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ThrottleError::InvalidPolicy("key must not be empty".to_string()));
        }
        if self.capacity < 1 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "capacity must be at least 1 for key {}",
                self.key
            )));
        }
        if self.kind == AlgorithmKind::SlidingWindow && self.window_seconds < 1 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "window_seconds must be at least 1 for key {}",
                self.key
            )));
        }
        Ok(())
    }
}
