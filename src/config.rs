//! Runtime configuration: a TOML file plus `TURF_MAP_*` environment overrides.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV: &str = "TURF_MAP_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "turf-map.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{name} must be {expected}, got {value:?}")]
    Env {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    /// Serve from an in-memory store with sample data
    pub offline: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            offline: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: f64,
    /// GeoJSON lines drawn under the territories
    pub basemap: Option<PathBuf>,
}

impl Default for MapConfig {
    fn default() -> Self {
        // Lower Manhattan
        Self {
            center_lon: -74.006,
            center_lat: 40.7128,
            zoom: 8000.0,
            basemap: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerritoryConfig {
    /// Empty means the built-in palette
    pub palette: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub user: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { user: "anonymous".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub file: PathBuf,
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("turf-map.log"),
            filter: "turf_map=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api: ApiConfig,
    pub map: MapConfig,
    pub territory: TerritoryConfig,
    pub session: SessionConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load with an injectable variable lookup.
    ///
    /// The file named by `TURF_MAP_CONFIG` must exist; `./turf-map.toml` is
    /// optional. Overrides are applied on top of whichever was used.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup("TURF_MAP_API_URL") {
            self.api.base_url = url;
        }
        if let Some(user) = lookup("TURF_MAP_USER") {
            self.session.user = user;
        }
        if let Some(value) = lookup("TURF_MAP_OFFLINE") {
            self.api.offline = parse_bool(&value).ok_or(ConfigError::Env {
                name: "TURF_MAP_OFFLINE",
                expected: "a boolean",
                value,
            })?;
        }
        if let Some(value) = lookup("TURF_MAP_WORKERS") {
            self.worker.threads = value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Env {
                    name: "TURF_MAP_WORKERS",
                    expected: "a positive integer",
                    value,
                })?;
        }
        if let Some(file) = lookup("TURF_MAP_LOG") {
            self.log.file = PathBuf::from(file);
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r##"
            [api]
            base_url = "https://turf.example.org/api"

            [territory]
            palette = ["#112233", "#445566"]
            "##,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://turf.example.org/api");
        assert!(!config.api.offline);
        assert_eq!(config.territory.palette.len(), 2);
        assert_eq!(config.worker, WorkerConfig::default());
        assert_eq!(config.log.filter, "turf_map=info");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::from_toml("[api]\nbase_uri = \"x\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(&env(&[
                ("TURF_MAP_API_URL", "http://10.0.0.2/api"),
                ("TURF_MAP_USER", "dana"),
                ("TURF_MAP_OFFLINE", "yes"),
                ("TURF_MAP_WORKERS", "4"),
                ("TURF_MAP_LOG", "/tmp/turf.log"),
            ]))
            .unwrap();
        assert_eq!(config.api.base_url, "http://10.0.0.2/api");
        assert_eq!(config.session.user, "dana");
        assert!(config.api.offline);
        assert_eq!(config.worker.threads, 4);
        assert_eq!(config.log.file, PathBuf::from("/tmp/turf.log"));
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_overrides(&env(&[("TURF_MAP_WORKERS", "0")])),
            Err(ConfigError::Env { name: "TURF_MAP_WORKERS", .. })
        ));
        assert!(matches!(
            config.apply_overrides(&env(&[("TURF_MAP_OFFLINE", "maybe")])),
            Err(ConfigError::Env { name: "TURF_MAP_OFFLINE", .. })
        ));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let result = Config::load_with(env(&[(CONFIG_ENV, "/nonexistent/turf-map.toml")]));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
