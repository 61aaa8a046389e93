//! Best-effort upload-speed estimation.
//!
//! The estimator never fails an upload: any error from the probe simply
//! disables measured-bandwidth estimation for that upload, falling back to
//! elapsed-wall-bandwidth ETA computed from the chunk loop itself.

use std::time::{Duration, Instant};

/// Tracks bytes sent against wall-clock time to produce an ETA for the
/// remaining bytes, with an optional measured-bandwidth override supplied
/// by a pre-upload probe.
pub struct SpeedEstimator {
    started_at: Instant,
    bytes_sent: u64,
    measured_bytes_per_sec: Option<f64>,
}

impl SpeedEstimator {
    /// Start a fresh estimator. `measured_bytes_per_sec`, if present, came
    /// from a successful bandwidth probe and takes priority over the
    /// elapsed-wall-bandwidth fallback.
    pub fn start(measured_bytes_per_sec: Option<f64>) -> Self {
        Self {
            started_at: Instant::now(),
            bytes_sent: 0,
            measured_bytes_per_sec,
        }
    }

    /// Record that `sent` additional bytes were confirmed by the server.
    pub fn record(&mut self, sent: u64) {
        self.bytes_sent += sent;
    }

    /// Disable the measured-bandwidth override, e.g. because the probe
    /// request itself failed partway through the upload.
    pub fn disable_measured(&mut self) {
        self.measured_bytes_per_sec = None;
    }

    /// Estimate remaining time given `remaining_bytes`. Returns `None` if
    /// neither a measured bandwidth nor enough elapsed wall time to derive
    /// one is available yet.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        if remaining_bytes == 0 {
            return Some(Duration::ZERO);
        }
        let bytes_per_sec = self.measured_bytes_per_sec.or_else(|| {
            let elapsed = self.started_at.elapsed().as_secs_f64();
            if elapsed <= 0.0 || self.bytes_sent == 0 {
                None
            } else {
                Some(self.bytes_sent as f64 / elapsed)
            }
        })?;
        if bytes_per_sec <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / bytes_per_sec))
    }
}

/// Attempt a bandwidth probe against `probe_url` by timing a single bounded
/// `HEAD` request. Any transport error, timeout, or non-2xx response
/// disables measured estimation for this upload; it is never surfaced to
/// the caller as an upload failure.
pub async fn probe_bandwidth(
    client: &crate::http::HttpClient,
    probe_url: &str,
    probe_bytes: u64,
) -> Option<f64> {
    let started = Instant::now();
    let response = client.head(probe_url).send().await.ok()?;
    if !response.is_success() {
        return None;
    }
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed <= 0.0 || probe_bytes == 0 {
        return None;
    }
    Some(probe_bytes as f64 / elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_remaining_is_instant() {
        let estimator = SpeedEstimator::start(Some(1000.0));
        assert_eq!(estimator.eta(0), Some(Duration::ZERO));
    }

    #[test]
    fn measured_bandwidth_takes_priority() {
        let estimator = SpeedEstimator::start(Some(1000.0));
        assert_eq!(estimator.eta(1000), Some(Duration::from_secs(1)));
    }

    #[test]
    fn falls_back_without_measurement_or_elapsed_time() {
        let estimator = SpeedEstimator::start(None);
        assert_eq!(estimator.eta(1000), None);
    }

    #[test]
    fn disabling_measured_forces_fallback_path() {
        let mut estimator = SpeedEstimator::start(Some(1000.0));
        estimator.disable_measured();
        // No elapsed time and no bytes sent yet, so still no estimate.
        assert_eq!(estimator.eta(1000), None);
    }
}
