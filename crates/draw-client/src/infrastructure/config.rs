//! TOML configuration for draw clients.
//!
//! Reads and writes [`DrawConfig`] at the platform-appropriate path:
//! - Linux:    `$XDG_CONFIG_HOME/drawclient/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/DrawClient/config.toml`
//!
//! ```toml
//! [session]
//! label = "acme"
//! width = 800
//! height = 600
//! buffer_size = 10000
//! dpi = 0
//! log_level = "info"
//!
//! [backend]
//! dev_root = "/dev"
//! socket_path = "/tmp/ns.glenda.:0/devdraw"
//! ```
//!
//! Every field has a default, so a missing file, a missing table, or a
//! missing key all work.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use draw_core::protocol::commands::ALLOC_IMAGE_LEN;

use crate::application::display::{SessionOptions, DEFAULT_BUFFER_SIZE};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is outside the range the session accepts.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Smallest command buffer a session can run with: it must hold the longest
/// command setup issues.
pub const MIN_BUFFER_SIZE: usize = ALLOC_IMAGE_LEN;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DrawConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Window and session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Window label.
    #[serde(default = "default_label")]
    pub label: String,
    /// Requested window width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Requested window height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Command buffer threshold in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Screen resolution; 0 when unknown.
    #[serde(default)]
    pub dpi: i32,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where to find the draw server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Root of the device tree (device-file builds).
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,
    /// Server socket (socket builds).  Defaults to `<namespace>/devdraw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

fn default_label() -> String {
    "draw".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            width: default_width(),
            height: default_height(),
            buffer_size: default_buffer_size(),
            dpi: 0,
            log_level: default_log_level(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dev_root: default_dev_root(),
            socket_path: None,
        }
    }
}

impl DrawConfig {
    /// Checks the values serde cannot.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `session.buffer_size` is below
    /// [`MIN_BUFFER_SIZE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "session.buffer_size must be at least {MIN_BUFFER_SIZE}, got {}",
                self.session.buffer_size
            )));
        }
        Ok(())
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(cfg: &SessionConfig) -> Self {
        SessionOptions {
            buffer_size: cfg.buffer_size,
            dpi: cfg.dpi,
        }
    }
}

// ── File operations ───────────────────────────────────────────────────────────

/// Resolves the platform config directory, including the `drawclient`
/// subdirectory.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Parses and validates a config held in memory.
pub fn parse_config(content: &str) -> Result<DrawConfig, ConfigError> {
    let config: DrawConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Loads the config from its platform path, returning defaults if the file
/// does not exist yet.
pub fn load_config() -> Result<DrawConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value is out of range.
pub fn load_config_from(path: &Path) -> Result<DrawConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DrawConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to its platform path.
pub fn save_config(config: &DrawConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
pub fn save_config_to(config: &DrawConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DrawClient")
        })
    }

    #[cfg(not(target_os = "macos"))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("drawclient"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
