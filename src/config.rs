//! Application-level configuration loading: round timings, sweeper cadence and storage selection.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TAP_ROUNDS_BACK_CONFIG_PATH";

const DEFAULT_ROUND_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_COOLDOWN_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(1_000);
const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";
const DEFAULT_PORT: u16 = 8080;

/// Persistence backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local store; state is lost on restart.
    Memory,
    /// MongoDB replica set.
    Mongo,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(StorageBackend::Memory),
            "mongo" | "mongodb" => Some(StorageBackend::Mongo),
            _ => None,
        }
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        if cfg!(feature = "mongo-store") {
            StorageBackend::Mongo
        } else {
            StorageBackend::Memory
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Length of the active window of a round.
    pub round_duration: Duration,
    /// Delay between round creation and the start of its active window.
    pub cooldown_duration: Duration,
    /// Period of the status sweeper.
    pub sweep_interval: Duration,
    /// Selected persistence backend.
    pub storage: StorageBackend,
    /// MongoDB connection string.
    pub mongo_uri: String,
    /// MongoDB database name; the store picks its default when absent.
    pub mongo_db: Option<String>,
    /// HTTP listening port.
    pub port: u16,
}

impl AppConfig {
    /// Load the configuration file (if any) and apply environment overrides on top.
    pub fn load() -> Self {
        Self::from_file().with_overrides(|key| env::var(key).ok())
    }

    fn from_file() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration file");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Apply the deployment environment variables resolved through `lookup`.
    ///
    /// `ROUND_DURATION` is expressed in minutes and `COOLDOWN_DURATION` in seconds.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(minutes) = positive_number(&lookup, "ROUND_DURATION") {
            self.round_duration = Duration::from_secs(minutes * 60);
        }
        if let Some(seconds) = positive_number(&lookup, "COOLDOWN_DURATION") {
            self.cooldown_duration = Duration::from_secs(seconds);
        }
        if let Some(millis) = positive_number(&lookup, "SWEEP_INTERVAL_MS") {
            self.sweep_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup("STORAGE_BACKEND") {
            match StorageBackend::parse(&raw) {
                Some(backend) => self.storage = backend,
                None => warn!(value = %raw, "unknown STORAGE_BACKEND; keeping {:?}", self.storage),
            }
        }
        if let Some(uri) = lookup("MONGO_URI").filter(|uri| !uri.trim().is_empty()) {
            self.mongo_uri = uri;
        }
        if let Some(db) = lookup("MONGO_DB").filter(|db| !db.trim().is_empty()) {
            self.mongo_db = Some(db);
        }
        if let Some(port) = lookup("PORT")
            .or_else(|| lookup("SERVER_PORT"))
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.port = port;
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration: DEFAULT_ROUND_DURATION,
            cooldown_duration: DEFAULT_COOLDOWN_DURATION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            storage: StorageBackend::default(),
            mongo_uri: DEFAULT_MONGO_URI.to_owned(),
            mongo_db: None,
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    round_duration_secs: Option<u64>,
    cooldown_duration_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    storage: Option<String>,
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
    port: Option<u16>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            round_duration: positive_duration(value.round_duration_secs, Duration::from_secs)
                .unwrap_or(defaults.round_duration),
            cooldown_duration: positive_duration(value.cooldown_duration_secs, Duration::from_secs)
                .unwrap_or(defaults.cooldown_duration),
            sweep_interval: positive_duration(value.sweep_interval_ms, Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            storage: value
                .storage
                .as_deref()
                .and_then(StorageBackend::parse)
                .unwrap_or(defaults.storage),
            mongo_uri: value.mongo_uri.unwrap_or(defaults.mongo_uri),
            mongo_db: value.mongo_db,
            port: value.port.unwrap_or(defaults.port),
        }
    }
}

fn positive_duration(value: Option<u64>, unit: fn(u64) -> Duration) -> Option<Duration> {
    value.filter(|value| *value > 0).map(unit)
}

/// Read a strictly positive integer, ignoring (and logging) anything else.
fn positive_number<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring non-positive or invalid duration");
            None
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_durations_use_deployment_units() {
        let config = AppConfig::default().with_overrides(lookup_from(&[
            ("ROUND_DURATION", "2"),
            ("COOLDOWN_DURATION", "45"),
            ("SWEEP_INTERVAL_MS", "250"),
        ]));

        assert_eq!(config.round_duration, Duration::from_secs(120));
        assert_eq!(config.cooldown_duration, Duration::from_secs(45));
        assert_eq!(config.sweep_interval, Duration::from_millis(250));
    }

    #[test]
    fn invalid_durations_keep_defaults() {
        let config = AppConfig::default().with_overrides(lookup_from(&[
            ("ROUND_DURATION", "0"),
            ("COOLDOWN_DURATION", "soon"),
        ]));

        assert_eq!(config.round_duration, DEFAULT_ROUND_DURATION);
        assert_eq!(config.cooldown_duration, DEFAULT_COOLDOWN_DURATION);
    }

    #[test]
    fn storage_and_port_overrides() {
        let config = AppConfig::default().with_overrides(lookup_from(&[
            ("STORAGE_BACKEND", "memory"),
            ("SERVER_PORT", "9000"),
            ("MONGO_DB", "rounds_test"),
        ]));

        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.port, 9000);
        assert_eq!(config.mongo_db.as_deref(), Some("rounds_test"));
    }

    #[test]
    fn raw_file_values_are_validated() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"round_duration_secs": 90, "cooldown_duration_secs": 0, "storage": "mongo"}"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.round_duration, Duration::from_secs(90));
        assert_eq!(config.cooldown_duration, DEFAULT_COOLDOWN_DURATION);
        assert_eq!(config.storage, StorageBackend::Mongo);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
