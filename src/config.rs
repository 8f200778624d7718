use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_ID_CEILING;
use crate::codec::DEFAULT_FLOAT_DIGITS;
use crate::error::KiraError;

pub const CONFIG_FILE_NAME: &str = "kira-cs.json";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub id_ceiling: Option<u32>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub float_digits: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub schema_version: u32,
    pub cache_dir: Utf8PathBuf,
    pub id_ceiling: u32,
    pub poll_interval: Duration,
    pub float_digits: usize,
}

impl SessionConfig {
    /// Defaults with an explicit cache directory.
    pub fn with_cache_dir(cache_dir: Utf8PathBuf) -> Self {
        Self {
            schema_version: 1,
            cache_dir,
            id_ceiling: DEFAULT_ID_CEILING,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            float_digits: DEFAULT_FLOAT_DIGITS,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-cs.json` in the current directory when present.
    /// Without either, defaults are used.
    pub fn resolve(path: Option<&str>) -> Result<SessionConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<SessionConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_dir()?,
        };

        let id_ceiling = config.id_ceiling.unwrap_or(DEFAULT_ID_CEILING);
        if id_ceiling == 0 {
            return Err(KiraError::ConfigParse(
                "id_ceiling must be positive".to_string(),
            ));
        }
        let float_digits = config.float_digits.unwrap_or(DEFAULT_FLOAT_DIGITS);
        if float_digits == 0 {
            return Err(KiraError::ConfigParse(
                "float_digits must be positive".to_string(),
            ));
        }
        let poll_interval = Duration::from_millis(
            config
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(1),
        );

        Ok(SessionConfig {
            schema_version,
            cache_dir,
            id_ceiling,
            poll_interval,
            float_digits,
        })
    }
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, KiraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("kira-chrom-session")
                    .join("files"),
            )
            .ok()
        })
        .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
}
