//! Configuration system for roomdrop.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ROOMDROP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/roomdrop/config.toml
//!   3. ~/.config/roomdrop/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default chunk size for chunked transfers.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size used. A base64 chunk frame of this size stays under
/// the 64 MiB frame limit.
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomdropConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub receive: ReceiveConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name sent to peers. Empty = pick a random one per run.
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the host listens on.
    pub bind_addr: String,
    /// TCP port the host listens on. 0 = OS-assigned.
    pub port: u16,
}

/// Which transfer encoding the sender uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Whole-file up to `whole_file_max_bytes`, chunked above it.
    Auto,
    Chunked,
    WholeFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub mode: TransferMode,
    /// Bytes per chunk in chunked mode.
    pub chunk_size: usize,
    /// Delay between chunk sends. 0 = no pacing.
    pub pacing_ms: u64,
    /// Auto mode switches to chunked above this size.
    pub whole_file_max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    pub download_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 7878,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::Auto,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing_ms: 5,
            whole_file_max_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            download_dir: data_dir().join("downloads"),
        }
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "chunked" => Ok(Self::Chunked),
            "whole-file" | "whole_file" | "wholefile" => Ok(Self::WholeFile),
            other => Err(format!("unknown transfer mode: {other}")),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("roomdrop")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("roomdrop")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RoomdropConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a specific file, or defaults if it does not exist. No env overrides.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ROOMDROP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &std::path::Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&RoomdropConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply ROOMDROP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROOMDROP_IDENTITY__NICKNAME") {
            self.identity.nickname = v;
        }
        if let Some(v) = lookup("ROOMDROP_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("ROOMDROP_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(m) = lookup("ROOMDROP_TRANSFER__MODE").and_then(|v| v.parse().ok()) {
            self.transfer.mode = m;
        }
        if let Some(n) = lookup("ROOMDROP_TRANSFER__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.transfer.chunk_size = n;
        }
        if let Some(n) = lookup("ROOMDROP_TRANSFER__PACING_MS").and_then(|v| v.parse().ok()) {
            self.transfer.pacing_ms = n;
        }
        if let Some(v) = lookup("ROOMDROP_RECEIVE__DOWNLOAD_DIR") {
            self.receive.download_dir = PathBuf::from(v);
        }
    }

    /// Chunk size with 0 replaced by the default and capped at [`MAX_CHUNK_SIZE`].
    pub fn effective_chunk_size(&self) -> usize {
        match self.transfer.chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        }
    }
}
