//! Speedtest server discovery.
//!
//! Runs once at startup: locate the measuring host, fetch the public server
//! list and order it by distance.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::store::Target;

const CONFIG_URL: &str = "http://www.speedtest.net/speedtest-config.php";
const SERVER_LIST_URLS: [&str; 2] = [
    "http://www.speedtest.net/speedtest-servers-static.php",
    "http://c.speedtest.net/speedtest-servers-static.php",
];

const EARTH_RADIUS_KM: f64 = 6378.137;

/// Discovery error types.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("no speedtest servers available")]
    NoServers,
}

/// Where the measuring host appears to be.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub ip: String,
    pub isp: String,
    pub lat: f64,
    pub lon: f64,
}

static ELEMENT_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_RE: OnceLock<Regex> = OnceLock::new();

fn element_re() -> &'static Regex {
    ELEMENT_RE.get_or_init(|| Regex::new(r"<(client|server)\s([^>]*?)/?>").expect("valid regex"))
}

fn attr_re() -> &'static Regex {
    ATTR_RE.get_or_init(|| Regex::new(r#"([A-Za-z0-9_]+)="([^"]*)""#).expect("valid regex"))
}

/// Parse the attributes of every `<name .../>` element in `xml`.
fn elements<'a>(xml: &'a str, name: &str) -> Vec<HashMap<&'a str, String>> {
    element_re()
        .captures_iter(xml)
        .filter(|c| &c[1] == name)
        .filter_map(|c| c.get(2))
        .map(|attrs| {
            attr_re()
                .captures_iter(attrs.as_str())
                .filter_map(|a| Some((a.get(1)?.as_str(), unescape(a.get(2)?.as_str()))))
                .collect()
        })
        .collect()
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn coord(attrs: &HashMap<&str, String>, key: &str) -> f64 {
    attrs.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

fn text(attrs: &HashMap<&str, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

/// Parse the `<client>` element of a speedtest configuration document.
pub fn parse_client_info(xml: &str) -> Option<ClientInfo> {
    elements(xml, "client").into_iter().next().map(|attrs| ClientInfo {
        ip: text(&attrs, "ip"),
        isp: text(&attrs, "isp"),
        lat: coord(&attrs, "lat"),
        lon: coord(&attrs, "lon"),
    })
}

/// Parse every `<server>` element. Entries with a non-numeric ID are skipped.
pub fn parse_servers(xml: &str) -> Vec<Target> {
    elements(xml, "server")
        .into_iter()
        .filter_map(|attrs| {
            let id = match attrs.get("id").map(|v| v.parse::<u32>()) {
                Some(Ok(id)) => id,
                _ => {
                    tracing::debug!("Skipping server entry without numeric id: {:?}", attrs);
                    return None;
                }
            };
            Some(Target {
                id,
                name: text(&attrs, "name"),
                country: text(&attrs, "country"),
                sponsor: text(&attrs, "sponsor"),
                url: text(&attrs, "url"),
                host: text(&attrs, "host"),
                lat: coord(&attrs, "lat"),
                lon: coord(&attrs, "lon"),
                distance_km: 0.0,
            })
        })
        .collect()
}

/// Great-circle distance in kilometres (spherical law of cosines).
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (a1, b1) = (lat1.to_radians(), lon1.to_radians());
    let (a2, b2) = (lat2.to_radians(), lon2.to_radians());

    let x = a1.sin() * a2.sin() + a1.cos() * a2.cos() * (b2 - b1).cos();
    // Rounding can push x just past 1 for identical points
    EARTH_RADIUS_KM * x.clamp(-1.0, 1.0).acos()
}

/// Fill in distances from `client` and sort closest first.
pub fn sort_by_distance(servers: &mut [Target], client: &ClientInfo) {
    for s in servers.iter_mut() {
        s.distance_km = distance(s.lat, s.lon, client.lat, client.lon);
    }
    servers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
}

/// HTTP client for the discovery endpoints.
pub struct Discovery {
    client: reqwest::Client,
}

impl Discovery {
    pub fn new(timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<String, DiscoveryError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))
    }

    /// Look up the measuring host. Failure is not fatal; an empty
    /// `ClientInfo` at (0, 0) is returned instead.
    pub async fn fetch_client_info(&self) -> ClientInfo {
        let info = match self.get_text(CONFIG_URL).await {
            Ok(body) => parse_client_info(&body),
            Err(e) => {
                tracing::warn!("Cannot fetch client information: {}", e);
                None
            }
        };

        match info {
            Some(info) => {
                tracing::info!(
                    "Testing from IP: {} ({}) [{}, {}]",
                    info.ip,
                    info.isp,
                    info.lat,
                    info.lon
                );
                info
            }
            None => {
                tracing::warn!("{} is temporarily unavailable, distances will be unreliable", CONFIG_URL);
                ClientInfo::default()
            }
        }
    }

    /// Fetch all public servers, closest first.
    pub async fn fetch_server_list(&self, client: &ClientInfo) -> Result<Vec<Target>, DiscoveryError> {
        let mut servers = Vec::new();

        for url in SERVER_LIST_URLS {
            match self.get_text(url).await {
                Ok(body) => {
                    servers = parse_servers(&body);
                    if !servers.is_empty() {
                        break;
                    }
                    tracing::warn!("Server list from {} was empty", url);
                }
                Err(e) => tracing::warn!("Failed to fetch server list from {}: {}", url, e),
            }
        }

        if servers.is_empty() {
            return Err(DiscoveryError::NoServers);
        }

        sort_by_distance(&mut servers, client);
        tracing::info!("Discovered {} speedtest servers", servers.len());
        Ok(servers)
    }
}

/// Log the server list, one line per server.
pub fn show_servers(servers: &[Target]) {
    for s in servers {
        tracing::info!(
            "[{:>5}] {:8.2}km {} ({}) by {}",
            s.id,
            s.distance_km,
            s.name,
            s.country,
            s.sponsor
        );
    }
}
