//! Proxy configuration.
//!
//! One TOML file, every key optional. User values are merged over the stock
//! defaults, unknown keys are rejected to catch typos early, and the merged
//! result is validated before the server starts.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! address = "localhost"     # Interface to listen on
//! port = 8080
//!
//! [cache]
//! capacity = 20             # Max renditions kept on disk
//! storage_path = "cache"    # Directory holding one file per rendition
//! restore = true            # Re-index existing files on startup
//!
//! [query]
//! timeout = 15              # Seconds allowed for one origin fetch
//!
//! [images]
//! quality = 80              # JPEG quality (1-100)
//! max_dimension = 10000     # Largest accepted width or height
//!
//! [log]
//! level = "info"            # trace, debug, info, warn, error
//! # file = "/var/log/thumbproxy.log"
//! mute_stdout = false
//! ```
//!
//! A missing file is not an error: the proxy warns and runs on defaults.
//! A file that exists but fails to parse or validate stops startup.

use crate::cache::CacheOptions;
use crate::imaging::{DEFAULT_MAX_DIMENSION, Quality, TransformOptions};
use crate::previewer::Settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    /// The file was missing; stock defaults are in effect.
    Defaults(PathBuf),
}

/// Full proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub images: ImagesConfig,
    pub log: LogConfig,
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Validation(
                "cache.capacity must be at least 1".into(),
            ));
        }
        if self.query.timeout == 0 {
            return Err(ConfigError::Validation(
                "query.timeout must be at least 1 second".into(),
            ));
        }
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "images.max_dimension must be non-zero".into(),
            ));
        }
        if self.log.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Validation(format!(
                "log.level {:?} is not one of trace, debug, info, warn, error",
                self.log.level
            )));
        }
        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            root: self.cache.storage_path.clone(),
            capacity: self.cache.capacity,
            restore: self.cache.restore,
        }
    }

    pub fn previewer_settings(&self) -> Settings {
        Settings {
            timeout: Duration::from_secs(self.query.timeout),
            transform: TransformOptions {
                quality: Quality::new(self.images.quality),
                max_dimension: self.images.max_dimension,
            },
        }
    }
}

/// Listening socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Rendition cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of renditions kept.
    pub capacity: usize,
    pub storage_path: PathBuf,
    /// Rebuild the index from files already in `storage_path` on startup.
    pub restore: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            storage_path: PathBuf::from("cache"),
            restore: true,
        }
    }
}

/// Origin fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Seconds, covering connect through the last body byte.
    pub timeout: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout: 15 }
    }
}

/// Rendition encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub quality: u32,
    pub max_dimension: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
    /// Silence the console output (file output is unaffected).
    pub mute_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            mute_stdout: false,
        }
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. `Ok(None)` when it doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(toml::from_str(&content)?))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config at `path`, falling back to defaults if the file is
/// missing. The returned [`Source`] says which happened so the caller can
/// warn once logging is up.
pub fn load_config(path: &Path) -> Result<(Config, Source), ConfigError> {
    let overlay = load_raw_config(path)?;
    let source = match overlay {
        Some(_) => Source::File(path.to_path_buf()),
        None => Source::Defaults(path.to_path_buf()),
    };
    Ok((resolve_config(overlay)?, source))
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Printed by `--print-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbproxy configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys are an error.

[server]
# Interface and port to listen on.
address = "localhost"
port = 8080

[cache]
# Maximum number of renditions kept. The least recently used one is
# evicted when a new rendition would exceed this.
capacity = 20
# Directory holding one file per rendition. Created if missing.
storage_path = "cache"
# Re-index renditions already in storage_path on startup (newest kept).
# When false the cache starts empty; use --clear to reclaim old files.
restore = true

[query]
# Seconds allowed for one origin fetch, connect through last byte.
timeout = 15

[images]
# JPEG quality (1-100). PNG and GIF are lossless.
quality = 80
# Largest accepted width or height. Larger requests get a 400.
max_dimension = 10000

[log]
# trace, debug, info, warn or error. RUST_LOG overrides this.
level = "info"
# Also append log lines to a file.
# file = "/var/log/thumbproxy.log"
# Silence console output.
mute_stdout = false
"##
}
