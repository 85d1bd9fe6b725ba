//! Configuration loading: TOML file, environment variables, or defaults

use crate::upload::IdStrategy;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Service configuration. Every field has a default so an empty file (or
/// no file at all) yields a working single-directory deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the `uploads/` and `locks/` trees
    pub storage_root: PathBuf,

    /// Upload collection URI template; may be a regex for deployments
    /// that embed other path segments ("/users/[0-9]+/files")
    pub upload_uri: String,

    /// Largest accepted Upload-Length in bytes; 0 disables the limit
    pub max_upload_size: u64,

    /// How long an idle upload survives, as a humantime string ("24h").
    /// Absent means uploads never expire.
    pub expiration_period: Option<String>,

    pub id_strategy: IdStrategy,

    /// Decode chunked transfer encoding in the engine. Disable when the
    /// transport in front already de-chunks bodies (trailer checksums
    /// then require transport support).
    pub chunked_decoding: bool,

    /// Idle time before a leftover lock file may be collected
    pub stale_lock_grace: String,

    /// Pause between background sweep runs
    pub reaper_interval: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_root: PathBuf::from("./tus-data"),
            upload_uri: "/uploads".to_string(),
            max_upload_size: 0,
            expiration_period: None,
            id_strategy: IdStrategy::default(),
            chunked_decoding: true,
            stale_lock_grace: "10s".to_string(),
            reaper_interval: "60s".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Configuration from `TUSERVE_*` environment variables over the
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Ok(v) = env::var("TUSERVE_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TUSERVE_UPLOAD_URI") {
            config.upload_uri = v;
        }
        if let Ok(v) = env::var("TUSERVE_MAX_UPLOAD_SIZE") {
            config.max_upload_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TUSERVE_MAX_UPLOAD_SIZE".to_string(),
                message: format!("{} is not a byte count", v),
            })?;
        }
        if let Ok(v) = env::var("TUSERVE_EXPIRATION_PERIOD") {
            config.expiration_period = Some(v);
        }
        if let Ok(v) = env::var("TUSERVE_ID_STRATEGY") {
            config.id_strategy = match v.as_str() {
                "uuid" => IdStrategy::Uuid,
                "time-based" => IdStrategy::TimeBased,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "TUSERVE_ID_STRATEGY".to_string(),
                        message: format!("{} is not uuid or time-based", other),
                    })
                }
            };
        }
        if let Ok(v) = env::var("TUSERVE_CHUNKED_DECODING") {
            config.chunked_decoding = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("TUSERVE_STALE_LOCK_GRACE") {
            config.stale_lock_grace = v;
        }
        if let Ok(v) = env::var("TUSERVE_REAPER_INTERVAL") {
            config.reaper_interval = v;
        }
        Ok(config)
    }

    /// File pointed to by `TUSERVE_CONFIG` when set, environment
    /// variables otherwise.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var("TUSERVE_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    pub fn expiration_period(&self) -> Result<Option<Duration>, ConfigError> {
        self.expiration_period
            .as_deref()
            .map(|raw| parse_duration("expiration_period", raw))
            .transpose()
    }

    pub fn stale_lock_grace(&self) -> Result<Duration, ConfigError> {
        parse_duration("stale_lock_grace", &self.stale_lock_grace)
    }

    pub fn reaper_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("reaper_interval", &self.reaper_interval)
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}: {}", raw, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.upload_uri, "/uploads");
        assert_eq!(config.max_upload_size, 0);
        assert!(config.chunked_decoding);
        assert_eq!(config.expiration_period().unwrap(), None);
        assert_eq!(config.stale_lock_grace().unwrap(), Duration::from_secs(10));
        assert_eq!(config.reaper_interval().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
storage_root = "/var/lib/tuserve"
upload_uri = "/files"
max_upload_size = 1073741824
expiration_period = "24h"
id_strategy = "time-based"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/tuserve"));
        assert_eq!(config.upload_uri, "/files");
        assert_eq!(config.max_upload_size, 1073741824);
        assert_eq!(
            config.expiration_period().unwrap(),
            Some(Duration::from_secs(24 * 3600))
        );
        assert_eq!(config.id_strategy, IdStrategy::TimeBased);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "no_such_key = true").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_duration_is_reported() {
        let config = Config {
            expiration_period: Some("not-a-duration".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.expiration_period(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
