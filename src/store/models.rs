//! Measurement model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A speedtest server discovered at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
    pub id: u32,
    pub name: String,
    pub country: String,
    pub sponsor: String,
    /// Upload endpoint, e.g. `http://host:8080/speedtest/upload.php`
    pub url: String,
    pub host: String,
    pub lat: f64,
    pub lon: f64,
    /// Great-circle distance from the measuring host in kilometres.
    pub distance_km: f64,
}

/// Ordered, never-empty set of targets measured on every cycle.
#[derive(Debug, Clone)]
pub struct TargetSet {
    targets: Vec<Target>,
}

impl TargetSet {
    /// Build a set from `targets`, or `None` when there is nothing to measure.
    pub fn new(targets: Vec<Target>) -> Option<Self> {
        if targets.is_empty() {
            None
        } else {
            Some(Self { targets })
        }
    }

    /// Select the discovered servers whose IDs were requested.
    ///
    /// Matches are returned in request order. When nothing matches, the set
    /// falls back to the first discovered server (the closest one, since
    /// discovery sorts by distance). Returns `None` only when `discovered` is
    /// empty.
    pub fn select(discovered: &[Target], ids: &[u32]) -> Option<Self> {
        let mut selected: Vec<Target> = ids
            .iter()
            .flat_map(|id| discovered.iter().filter(move |t| t.id == *id))
            .cloned()
            .collect();

        if selected.is_empty() {
            selected.extend(discovered.first().cloned());
        }

        Self::new(selected)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

/// Output of one probe invocation against one target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawMeasurement {
    /// Mbit/s
    pub download: f64,
    /// Mbit/s
    pub upload: f64,
    pub latency: Duration,
}

impl RawMeasurement {
    pub fn new(download: f64, upload: f64, latency: Duration) -> Self {
        Self {
            download,
            upload,
            latency,
        }
    }
}

/// The published snapshot served over HTTP.
///
/// Field names serialize in PascalCase so existing dashboards that read
/// `DownSpeed`/`UpSpeedStr`/`LastQuery` keep working.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LatestResult {
    pub down_speed: f64,
    pub down_speed_str: String,
    pub ping: String,
    pub latency_ms: f64,
    pub up_speed: f64,
    pub up_speed_str: String,
    /// `None` until the first cycle completes.
    pub last_query: Option<DateTime<Utc>>,
    /// Download/upload ratio looked implausible when this was produced.
    pub suspicious: bool,
}

/// Alert floors in Mbit/s, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlertThresholds {
    pub download: f64,
    pub upload: f64,
}
