//! Reduce per-target measurements into one published snapshot.

use chrono::Utc;

use crate::store::{LatestResult, RawMeasurement};

/// Ratio beyond which download vs upload is considered implausible.
const PLAUSIBLE_RATIO: f64 = 100.0;

/// One target's measurement from a single cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMeasurement {
    pub target_id: u32,
    pub raw: RawMeasurement,
}

/// True when download exceeds 100x upload or the other way round.
///
/// Multiplies instead of dividing so zero rates are fine.
pub fn is_implausible(m: &RawMeasurement) -> bool {
    m.download * PLAUSIBLE_RATIO < m.upload || m.download > m.upload * PLAUSIBLE_RATIO
}

/// Build the snapshot for one completed cycle.
///
/// A single target is published verbatim; several are averaged metric by
/// metric. The result is flagged suspicious when any contributing target is
/// implausible. Since every target satisfying the ratio bound implies the
/// averages do too, this also covers the aggregate.
pub fn aggregate(measurements: &[TargetMeasurement]) -> LatestResult {
    let mut result = match measurements {
        [] => render(&RawMeasurement::default(), ""),
        [single] => render(&single.raw, ""),
        many => {
            for m in many {
                tracing::info!(
                    "[{:>5}] Download: {:5.2} Mbit/s, Upload: {:5.2} Mbit/s, Latency: {:.2} ms",
                    m.target_id,
                    m.raw.download,
                    m.raw.upload,
                    millis(&m.raw)
                );
            }
            render(&mean(many), " Avg")
        }
    };

    result.suspicious = measurements.iter().any(|m| is_implausible(&m.raw));
    result.last_query = Some(Utc::now());

    tracing::info!("{}", result.down_speed_str);
    tracing::info!("{}", result.up_speed_str);
    tracing::info!("{}", result.ping);
    if result.suspicious {
        tracing::warn!("Result seems to be wrong, download/upload ratio is implausible");
    }

    result
}

fn mean(measurements: &[TargetMeasurement]) -> RawMeasurement {
    let n = measurements.len() as f64;
    let (download, upload, latency_secs) =
        measurements
            .iter()
            .fold((0.0, 0.0, 0.0), |(d, u, l), m| {
                (d + m.raw.download, u + m.raw.upload, l + m.raw.latency.as_secs_f64())
            });

    RawMeasurement::new(
        download / n,
        upload / n,
        std::time::Duration::from_secs_f64(latency_secs / n),
    )
}

fn millis(m: &RawMeasurement) -> f64 {
    m.latency.as_secs_f64() * 1000.0
}

fn render(m: &RawMeasurement, label: &str) -> LatestResult {
    LatestResult {
        down_speed: m.download,
        down_speed_str: format!("Download{}: {:5.2} Mbit/s", label, m.download),
        ping: format!("Latency{}: {:.2} ms", label, millis(m)),
        latency_ms: millis(m),
        up_speed: m.upload,
        up_speed_str: format!("Upload{}: {:5.2} Mbit/s", label, m.upload),
        last_query: None,
        suspicious: false,
    }
}
