use std::path::PathBuf;

use axum::http::HeaderValue;
use thiserror::Error;

/// Origins of the deployed front-ends plus the local dev server.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://ff14treasurhunt.netlify.app",
    "https://ff14treasurhunt.com",
    "https://www.ff14treasurhunt.com",
    "http://localhost:5173",
];

/// 10 MiB, the largest screenshot the front-end is allowed to send.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_COMPARE_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Directory holding `map_hash/`, `map_place/` and `map_image/`.
    pub data_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    /// Size of the thread pool used for hash comparisons.
    pub compare_workers: usize,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".into(),
            data_dir: PathBuf::from("."),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|&o| o.to_owned()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            compare_workers: DEFAULT_COMPARE_WORKERS,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset variables fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let listen_addr = lookup("TREASURE_LISTEN_ADDR").unwrap_or(defaults.listen_addr);

        let data_dir = lookup("TREASURE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let allowed_origins = match lookup("TREASURE_ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw)?,
            None => defaults.allowed_origins,
        };

        let max_upload_bytes = parse_number(
            "TREASURE_MAX_UPLOAD_BYTES",
            lookup("TREASURE_MAX_UPLOAD_BYTES"),
            defaults.max_upload_bytes,
        )?;

        let compare_workers = parse_number(
            "TREASURE_COMPARE_WORKERS",
            lookup("TREASURE_COMPARE_WORKERS"),
            defaults.compare_workers,
        )?;
        if compare_workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TREASURE_COMPARE_WORKERS",
                reason: "at least one worker required".into(),
            });
        }

        let request_timeout_secs = parse_number(
            "TREASURE_REQUEST_TIMEOUT_SECS",
            lookup("TREASURE_REQUEST_TIMEOUT_SECS"),
            defaults.request_timeout_secs,
        )?;

        Ok(Config {
            listen_addr,
            data_dir,
            allowed_origins,
            max_upload_bytes,
            compare_workers,
            request_timeout_secs,
        })
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    if origins.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: "TREASURE_ALLOWED_ORIGINS",
            reason: "at least one origin required".into(),
        });
    }

    for origin in &origins {
        HeaderValue::from_str(origin).map_err(|_| ConfigError::InvalidOrigin(origin.clone()))?;
    }

    Ok(origins)
}

fn parse_number<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(s) => s.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name,
            reason: format!("{s}: {e}"),
        }),
        None => Ok(default),
    }
}
