//! Configuration module.
//!
//! Loads a JSON configuration file, then applies environment overrides.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::store::AlertThresholds;

/// Files tried in order when no explicit path is given.
const DEFAULT_PATHS: [&str; 2] = [
    "./app/configuration/configuration.json",
    "/run/config/configuration.json",
];

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {0} not found")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where the configuration came from, reported once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub app_name: String,
    /// Download floor in Mbit/s
    pub download_threshold: f64,
    /// Upload floor in Mbit/s
    pub upload_threshold: f64,
    /// Seconds between the end of one poll cycle and the start of the next
    pub interval: u64,
    pub logging_level: String,
    pub server_mode: bool,
    /// Webhook URL; notifications are disabled when absent
    pub slack_endpoint: Option<String>,
    pub http_port: u16,
    /// Seconds allowed for graceful shutdown
    pub shutdown_timeout: u64,
    /// Seconds allowed per probe HTTP exchange
    pub probe_timeout: u64,
    /// Seconds an on-demand measurement may run before the caller gets the
    /// previous snapshot
    pub on_demand_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Speed Test".to_string(),
            download_threshold: 0.0,
            upload_threshold: 0.0,
            interval: 3600,
            logging_level: "info".to_string(),
            server_mode: false,
            slack_endpoint: None,
            http_port: 8080,
            shutdown_timeout: 5,
            probe_timeout: 10,
            on_demand_timeout: 120,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one the default locations are
    /// tried and built-in defaults are used when none exists.
    ///
    /// Environment variables applied afterwards:
    /// - `SPEEDMON_HTTP_PORT`: HTTP port
    /// - `SPEEDMON_SLACK_ENDPOINT`: webhook URL
    /// - `SPEEDMON_INTERVAL`: poll interval in seconds
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let (mut cfg, source) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                (Self::from_file(path)?, ConfigSource::File(path.to_path_buf()))
            }
            None => match DEFAULT_PATHS.iter().map(Path::new).find(|p| p.exists()) {
                Some(path) => (Self::from_file(path)?, ConfigSource::File(path.to_path_buf())),
                None => (Self::default(), ConfigSource::Defaults),
            },
        };

        cfg.apply_env();
        cfg.validate()?;
        Ok((cfg, source))
    }

    /// Parse a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if cfg.slack_endpoint.as_deref().is_some_and(|s| s.trim().is_empty()) {
            cfg.slack_endpoint = None;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(port_str) = env::var("SPEEDMON_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                self.http_port = port;
            }
        }

        if let Ok(endpoint) = env::var("SPEEDMON_SLACK_ENDPOINT") {
            self.slack_endpoint = Some(endpoint).filter(|s| !s.trim().is_empty());
        }

        if let Ok(interval_str) = env::var("SPEEDMON_INTERVAL") {
            if let Ok(interval) = interval_str.parse() {
                self.interval = interval;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::Invalid("interval must be positive".to_string()));
        }
        for (name, value) in [
            ("downloadThreshold", self.download_threshold),
            ("uploadThreshold", self.upload_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("probeTimeout", self.probe_timeout),
            ("shutdownTimeout", self.shutdown_timeout),
            ("onDemandTimeout", self.on_demand_timeout),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            download: self.download_threshold,
            upload: self.upload_threshold,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn on_demand_timeout(&self) -> Duration {
        Duration::from_secs(self.on_demand_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(5));
        assert!(cfg.slack_endpoint.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let file = write_config(
            r#"{
                "appName": "Home Link",
                "downloadThreshold": 50,
                "uploadThreshold": 10.5,
                "interval": 900,
                "loggingLevel": "debug",
                "serverMode": true,
                "slackEndpoint": "https://hooks.example.com/abc"
            }"#,
        );

        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.app_name, "Home Link");
        assert_eq!(cfg.thresholds(), AlertThresholds { download: 50.0, upload: 10.5 });
        assert_eq!(cfg.poll_interval(), Duration::from_secs(900));
        assert_eq!(cfg.logging_level, "debug");
        assert!(cfg.server_mode);
        assert_eq!(cfg.slack_endpoint.as_deref(), Some("https://hooks.example.com/abc"));
        // Keys not present keep defaults
        assert_eq!(cfg.http_port, 8080);
    }

    #[test]
    fn test_empty_endpoint_disables_notifications() {
        let file = write_config(r#"{ "slackEndpoint": "  " }"#);
        let cfg = Config::from_file(file.path()).unwrap();
        assert!(cfg.slack_endpoint.is_none());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let file = write_config("{ not json");
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate() {
        let cfg = Config {
            interval: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            download_threshold: -1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            upload_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config {
            shutdown_timeout: 0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("shutdownTimeout")),
            other => panic!("unexpected result {:?}", other),
        }

        let cfg = Config {
            on_demand_timeout: 0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("onDemandTimeout")),
            other => panic!("unexpected result {:?}", other),
        }

        let cfg = Config {
            probe_timeout: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
