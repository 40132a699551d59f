//! Configuration for provider and gatherer processes.
//!
//! Both roles read the same YAML file; each only looks at its own section.
//! Durations use humantime notation (`60s`, `1m`, `500ms`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sampler::DEFAULT_WINDOW_SIZE;

/// Default gatherer poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default load monitor tick interval.
pub const DEFAULT_LOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub gatherer: GathererConfig,
    pub provider: ProviderConfig,
}

impl StatsConfig {
    /// Load from a YAML file. Missing sections and fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Gatherer section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GathererConfig {
    /// Address to listen on for provider connections. Port 0 reuses the
    /// port recorded in the data directory, or picks a fresh one.
    pub listen_addr: SocketAddr,
    /// Directory holding the snapshot file, port file, and published address.
    pub data_dir: PathBuf,
    /// Snapshot file name, relative to `data_dir` unless absolute.
    pub snapshot_file: PathBuf,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            data_dir: PathBuf::from("./gatherer"),
            snapshot_file: PathBuf::from("stats.json"),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl GathererConfig {
    /// Full path of the canonical snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("gatherer.poll_interval", "must be > 0"));
        }
        if self.snapshot_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "gatherer.snapshot_file",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Provider section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Where the gatherer listens. Required to start a provider.
    pub gatherer_addr: Option<String>,
    /// Human-readable name shown next to this node's identity.
    pub nickname: String,
    /// Location of this node's persistent key.
    pub node_key_file: PathBuf,
    pub load_monitor: LoadMonitorConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gatherer_addr: None,
            nickname: String::new(),
            node_key_file: PathBuf::from("./node.key"),
            load_monitor: LoadMonitorConfig::default(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.gatherer_addr.as_deref() {
            None => {
                return Err(ConfigError::invalid(
                    "provider.gatherer_addr",
                    "a gatherer address is required",
                ));
            }
            Some(addr) if addr.trim().is_empty() => {
                return Err(ConfigError::invalid(
                    "provider.gatherer_addr",
                    "must not be empty",
                ));
            }
            Some(_) => {}
        }
        self.load_monitor.validate()
    }
}

/// Load monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadMonitorConfig {
    /// Expected time between ticks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Number of delay samples kept.
    pub window_size: usize,
    /// Delays above this are logged as warnings.
    #[serde(with = "humantime_serde")]
    pub warn_threshold: Duration,
}

impl Default for LoadMonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_LOAD_INTERVAL,
            window_size: DEFAULT_WINDOW_SIZE,
            warn_threshold: DEFAULT_LOAD_INTERVAL,
        }
    }
}

impl LoadMonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid(
                "provider.load_monitor.interval",
                "must be > 0",
            ));
        }
        if self.window_size == 0 {
            return Err(ConfigError::invalid(
                "provider.load_monitor.window_size",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = StatsConfig::default();
        assert_eq!(config.gatherer.poll_interval, Duration::from_secs(60));
        assert_eq!(config.provider.load_monitor.interval, Duration::from_secs(1));
        assert_eq!(config.provider.load_monitor.window_size, 60);
        assert_eq!(
            config.provider.load_monitor.warn_threshold,
            Duration::from_secs(1)
        );
        assert!(config.gatherer.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("stats.yaml");
        std::fs::write(
            &path,
            "gatherer:\n  poll_interval: 5s\nprovider:\n  nickname: node-1\n  gatherer_addr: 127.0.0.1:7000\n  load_monitor:\n    window_size: 10\n",
        )
        .unwrap();

        let config = StatsConfig::load(&path).unwrap();
        assert_eq!(config.gatherer.poll_interval, Duration::from_secs(5));
        assert_eq!(config.gatherer.snapshot_file, PathBuf::from("stats.json"));
        assert_eq!(config.provider.nickname, "node-1");
        assert_eq!(config.provider.load_monitor.window_size, 10);
        assert_eq!(config.provider.load_monitor.interval, Duration::from_secs(1));
        assert!(config.provider.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let tmp = tempdir().unwrap();
        let err = StatsConfig::load(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "gatherer:\n  poll_interval: soon\n").unwrap();
        let err = StatsConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let gatherer = GathererConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(gatherer.validate().is_err());

        let monitor = LoadMonitorConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(monitor.validate().is_err());

        let provider = ProviderConfig::default();
        let err = provider.validate().unwrap_err();
        assert!(err.to_string().contains("gatherer_addr"));
    }

    #[test]
    fn test_snapshot_path_joins_data_dir() {
        let config = GathererConfig {
            data_dir: PathBuf::from("/var/lib/stats"),
            ..Default::default()
        };
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/stats/stats.json")
        );
    }
}
