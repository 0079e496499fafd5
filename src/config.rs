//! File configuration for transfer tuning.
//!
//! Settings live in a TOML file; every key is optional and unknown keys are
//! rejected. Command-line flags override whatever the file provides.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::transfer::constants::{
    CANCEL_CHECK_THRESHOLD, CONNECT_TIMEOUT_SECS, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CHUNK_RETRIES,
    DEFAULT_MAX_RETRIES, FLUSH_THRESHOLD, PROGRESS_THRESHOLD, READ_TIMEOUT_SECS,
};

const APP_DIR: &str = "fetcher";
const CONFIG_FILE: &str = "config.toml";
const MAX_RETRY_SETTING: u32 = 100;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path, or `<inline>` for string input.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of its allowed range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Key name.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Human-readable allowed range.
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl Into<u64>, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.into(),
            expected,
        }
    }
}

/// Engine tuning shared by every transfer a downloader runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSettings {
    /// Whole-transfer retries after the first attempt.
    pub max_retries: u32,
    /// Retries for a single failed read.
    pub max_chunk_retries: u32,
    /// Initial read-buffer size in bytes.
    pub buffer_size: usize,
    /// Shrink the buffer after each failed attempt.
    pub diminishing_buffer: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Bytes written between flushes.
    pub flush_threshold: u64,
    /// Bytes read between progress events.
    pub progress_threshold: u64,
    /// Bytes read before cancellation is polled.
    pub cancel_check_threshold: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            buffer_size: DEFAULT_BUFFER_SIZE,
            diminishing_buffer: true,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            flush_threshold: FLUSH_THRESHOLD,
            progress_threshold: PROGRESS_THRESHOLD,
            cancel_check_threshold: CANCEL_CHECK_THRESHOLD,
        }
    }
}

impl TransferSettings {
    /// Parses settings from TOML text and validates them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input or unknown keys and
    /// [`ConfigError::OutOfRange`] for invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first invalid key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retries("max_retries", self.max_retries)?;
        validate_retries("max_chunk_retries", self.max_chunk_retries)?;
        if self.buffer_size == 0 {
            return Err(ConfigError::out_of_range("buffer_size", 0u64, ">= 1"));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_threshold("flush_threshold", self.flush_threshold)?;
        validate_threshold("progress_threshold", self.progress_threshold)?;
        validate_threshold("cancel_check_threshold", self.cancel_check_threshold)?;
        Ok(())
    }
}

fn validate_retries(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > MAX_RETRY_SETTING {
        return Err(ConfigError::out_of_range(field, value, "0..=100"));
    }
    Ok(())
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(ConfigError::out_of_range(field, value, "1..=3600"));
    }
    Ok(())
}

fn validate_threshold(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::out_of_range(field, value, ">= 1"));
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fetcher/config.toml`
/// 2. `$HOME/.config/fetcher/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads settings from an explicit path, which must exist.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load_settings(path: &Path) -> Result<TransferSettings, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: TransferSettings = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;
    debug!(path = %path.display(), "loaded config file");
    Ok(settings)
}

/// Loads settings from the default path, or defaults when no file exists there.
///
/// # Errors
///
/// Returns [`ConfigError`] if a file exists but is unreadable or invalid.
pub fn load_default_settings() -> Result<TransferSettings, ConfigError> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_settings(&path),
        _ => Ok(TransferSettings::default()),
    }
}
