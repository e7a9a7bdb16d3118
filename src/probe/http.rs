//! Speedtest probe over the legacy speedtest.net HTTP protocol.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use super::{Probe, ProbeError};
use crate::store::{RawMeasurement, Target};

/// Side lengths of the `random{N}x{N}.jpg` images fetched for download.
const DOWNLOAD_SIZES: [u32; 5] = [350, 500, 750, 1000, 1500];

/// Payload sizes posted for upload.
const UPLOAD_SIZES: [usize; 4] = [256 * 1024, 512 * 1024, 1024 * 1024, 2 * 1024 * 1024];

const LATENCY_SAMPLES: usize = 3;

/// Measures latency, download and upload against a speedtest server.
#[derive(Clone)]
pub struct SpeedtestProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl SpeedtestProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Minimum round trip of a few `latency.txt` fetches.
    async fn latency(&self, base: &str) -> Result<Duration, ProbeError> {
        let mut best: Option<Duration> = None;

        for _ in 0..LATENCY_SAMPLES {
            let url = format!("{}/latency.txt?x={}", base, cache_buster());
            let start = Instant::now();
            fetch(&self.client, &url, self.timeout).await?;
            let elapsed = start.elapsed();
            best = Some(best.map_or(elapsed, |b| b.min(elapsed)));
        }

        Ok(best.unwrap_or_default())
    }

    /// Download rate in Mbit/s.
    async fn download(&self, base: &str) -> Result<f64, ProbeError> {
        let mut tasks = JoinSet::new();
        let start = Instant::now();

        for size in DOWNLOAD_SIZES {
            let client = self.client.clone();
            let timeout = self.timeout;
            let url = format!("{}/random{}x{}.jpg?x={}", base, size, size, cache_buster());
            tasks.spawn(async move { fetch(&client, &url, timeout).await });
        }

        let bytes = collect_bytes(&mut tasks).await?;
        Ok(megabits_per_second(bytes, start.elapsed()))
    }

    /// Upload rate in Mbit/s.
    async fn upload(&self, upload_url: &str) -> Result<f64, ProbeError> {
        let mut tasks = JoinSet::new();
        let start = Instant::now();

        for size in UPLOAD_SIZES {
            let client = self.client.clone();
            let timeout = self.timeout;
            let url = format!("{}?x={}", upload_url, cache_buster());
            tasks.spawn(async move {
                let body = format!("content1={}", "0".repeat(size));
                let len = body.len() as u64;
                let response = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| map_reqwest_error(e, timeout))?;
                check_status(&response)?;
                response
                    .bytes()
                    .await
                    .map_err(|e| map_reqwest_error(e, timeout))?;
                Ok::<u64, ProbeError>(len)
            });
        }

        let bytes = collect_bytes(&mut tasks).await?;
        Ok(megabits_per_second(bytes, start.elapsed()))
    }
}

#[async_trait]
impl Probe for SpeedtestProbe {
    async fn measure(&self, target: &Target) -> Result<RawMeasurement, ProbeError> {
        tracing::info!(
            "Testing [{}] {} ({}) by {}, {:.2} km",
            target.id,
            target.name,
            target.country,
            target.sponsor,
            target.distance_km
        );

        let base = base_url(&target.url);
        let latency = self.latency(base).await?;
        let download = self.download(base).await?;
        let upload = self.upload(&target.url).await?;

        tracing::debug!(
            "[{}] latency {:?}, download {:.2} Mbit/s, upload {:.2} Mbit/s",
            target.id,
            latency,
            download,
            upload
        );

        Ok(RawMeasurement::new(download, upload, latency))
    }
}

/// GET `url` and return the number of body bytes received.
async fn fetch(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<u64, ProbeError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    check_status(&response)?;

    // Read the full body to measure complete transfer time
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    Ok(body.len() as u64)
}

async fn collect_bytes(tasks: &mut JoinSet<Result<u64, ProbeError>>) -> Result<u64, ProbeError> {
    let mut total = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(bytes)) => total += bytes,
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(ProbeError::Network(format!("transfer task failed: {}", e)));
            }
        }
    }
    Ok(total)
}

fn check_status(response: &reqwest::Response) -> Result<(), ProbeError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ProbeError::Status(status.as_u16()))
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Strip the final path segment: `http://h/speedtest/upload.php` -> `http://h/speedtest`.
pub fn base_url(url: &str) -> &str {
    match url.rfind('/') {
        Some(i) if i > url.find("://").map_or(0, |s| s + 2) => &url[..i],
        _ => url,
    }
}

pub fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        bytes as f64 * 8.0 / secs / 1_000_000.0
    }
}

fn cache_buster() -> u64 {
    rand::random()
}
