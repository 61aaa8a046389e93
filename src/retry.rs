//! Retry/backoff policy for chunk-level transport failures.

use std::time::Duration;

/// Strategy used to compute the wait between a failed chunk PATCH and the
/// next attempt. Pure functions of `(attempt, base)`; `attempt` is
/// zero-based and counts retries of a single chunk, not the whole upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Always wait `base`.
    Constant,
    /// Wait `base * (attempt + 1)`.
    Linear,
    /// Wait `base * 2^attempt`.
    #[default]
    Exponential,
}

impl RetryPolicy {
    /// Compute the wait duration for the given zero-based attempt and base
    /// interval (expressed in seconds, matching the tus client convention).
    pub fn interval(self, attempt: u32, base_secs: f64) -> Duration {
        let secs = match self {
            Self::Constant => base_secs,
            Self::Linear => base_secs * (attempt as f64 + 1.0),
            Self::Exponential => base_secs * 2f64.powi(attempt as i32),
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}
