//! Probe module for throughput and latency measurement.

mod http;

pub use http::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::store::{RawMeasurement, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("server answered with status {0}")]
    Status(u16),
}

/// Something that can measure one target.
///
/// Calls may block for the full duration of a network test.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn measure(&self, target: &Target) -> Result<RawMeasurement, ProbeError>;
}

/// Measure `target`, degrading any failure to a zero-valued measurement.
pub async fn probe_target(probe: &dyn Probe, target: &Target) -> RawMeasurement {
    match probe.measure(target).await {
        Ok(m) => RawMeasurement {
            download: sanitize_rate(m.download),
            upload: sanitize_rate(m.upload),
            latency: m.latency,
        },
        Err(e) => {
            tracing::warn!("Probe failed for [{}] {}: {}", target.id, target.name, e);
            RawMeasurement::default()
        }
    }
}

fn sanitize_rate(f: f64) -> f64 {
    if f.is_finite() && f > 0.0 {
        f
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<RawMeasurement, ()>);

    #[async_trait]
    impl Probe for Fixed {
        async fn measure(&self, _target: &Target) -> Result<RawMeasurement, ProbeError> {
            self.0
                .map_err(|_| ProbeError::Network("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_probe_failure_degrades_to_zero() {
        let probe = Fixed(Err(()));
        let m = probe_target(&probe, &Target::default()).await;
        assert_eq!(m, RawMeasurement::default());
    }

    #[tokio::test]
    async fn test_probe_values_pass_through() {
        let raw = RawMeasurement::new(93.2, 11.4, Duration::from_millis(17));
        let probe = Fixed(Ok(raw));
        assert_eq!(probe_target(&probe, &Target::default()).await, raw);
    }

    #[tokio::test]
    async fn test_probe_rejects_negative_and_nan_rates() {
        let probe = Fixed(Ok(RawMeasurement::new(-3.0, f64::NAN, Duration::from_millis(5))));
        let m = probe_target(&probe, &Target::default()).await;
        assert_eq!(m.download, 0.0);
        assert_eq!(m.upload, 0.0);
        assert_eq!(m.latency, Duration::from_millis(5));
    }
}
