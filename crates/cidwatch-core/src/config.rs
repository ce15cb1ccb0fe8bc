//! Configuration system for cidwatch.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CIDWATCH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cidwatch/config.toml
//!   3. ~/.config/cidwatch/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::wire::{MAX_FRAME_BYTES, PROTOCOL_VERSION};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CidwatchConfig {
    pub exporter: ExporterConfig,
    pub storage: StorageConfig,
    pub collaborators: CollaboratorConfig,
    pub retry: RetrySettings,
    pub downloads: DownloadSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub address: String,
    pub port: u16,
    /// Version we expect the exporter to announce, and echo back.
    pub protocol_version: u16,
    pub max_frame_bytes: usize,
    /// Re-dial after a failed session instead of exiting.
    pub reconnect: bool,
    pub reconnect_max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub save_dir: PathBuf,
    /// File names below are relative to `save_dir`.
    pub ledger_file: String,
    pub metadata_file: String,
    pub download_dir: String,
    pub seen_db_file: String,
    /// Size ceiling checked after every ledger append.
    pub ledger_max_bytes: u64,
    pub rotation: RotationPolicy,
    pub seen_store: SeenStoreKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub extractor_url: String,
    pub gateway_url: String,
    pub search_index_url: String,
    pub metadata_source: MetadataSourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    pub when_full: WhenFull,
    /// Seconds to let in-flight downloads finish on shutdown.
    pub drain_timeout_secs: u64,
}

/// What happens to the active ledger when it outgrows `ledger_max_bytes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Rename to `<ledger>.1` and start a fresh file. Followers finish the
    /// renamed file before moving on.
    #[default]
    Rename,
    /// Truncate in place. A follower positioned past the new end restarts
    /// from zero and may miss entries.
    Truncate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenStoreKind {
    /// Process lifetime only; every restart re-enriches.
    #[default]
    Memory,
    /// SQLite file under `save_dir`; survives restarts.
    Sqlite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSourceKind {
    #[default]
    Extractor,
    SearchIndex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhenFull {
    /// Wait for queue space.
    #[default]
    Block,
    /// Drop the request and count it.
    Reject,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8888,
            protocol_version: PROTOCOL_VERSION,
            max_frame_bytes: MAX_FRAME_BYTES,
            reconnect: false,
            reconnect_max_backoff_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./out"),
            ledger_file: "cids.txt".to_string(),
            metadata_file: "cids_meta.txt".to_string(),
            download_dir: "downloaded".to_string(),
            seen_db_file: "seen.db".to_string(),
            ledger_max_bytes: 1_073_741_824, // 1 GiB
            rotation: RotationPolicy::default(),
            seen_store: SeenStoreKind::default(),
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            extractor_url: "http://127.0.0.1:8081".to_string(),
            gateway_url: "http://127.0.0.1:8080".to_string(),
            search_index_url: "http://127.0.0.1:9200".to_string(),
            metadata_source: MetadataSourceKind::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            queue_capacity: 256,
            when_full: WhenFull::default(),
            drain_timeout_secs: 10,
        }
    }
}

// ── Derived paths ─────────────────────────────────────────────────────────────

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.save_dir.join(&self.ledger_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.save_dir.join(&self.metadata_file)
    }

    pub fn download_path(&self) -> PathBuf {
        self.save_dir.join(&self.download_dir)
    }

    pub fn seen_db_path(&self) -> PathBuf {
        self.save_dir.join(&self.seen_db_file)
    }
}

impl ExporterConfig {
    /// `host:port` for dialing.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("cidwatch")
}

fn home_dir() -> PathBuf {
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

impl CidwatchConfig {
    /// Env vars over `$CIDWATCH_CONFIG` (or the XDG file) over defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path(), |key| std::env::var(key).ok())
    }

    /// `load` with the file and environment supplied by the caller. A
    /// missing file means defaults; sections and keys absent from the file
    /// keep their defaults too.
    pub fn load_from(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: CidwatchConfig = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CidwatchConfig::default(),
            Err(e) => return Err(ConfigError::ReadFailed(path.to_path_buf(), e)),
        };
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("CIDWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Seed `file_path()` with the defaults on first run.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    /// Returns false when `path` already existed and was left alone.
    pub fn write_default_to(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&CidwatchConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(true)
    }

    /// Apply env var overrides. `lookup` is `std::env::var` in production;
    /// tests pass a map so the process environment is never touched.
    ///
    /// The exporter client's historical variable names (`SERVER_ADDR`,
    /// `SERVER_PORT`, `SAVE_DIR`, `TIKA_URL`, `GATEWAY_URL`) are honored
    /// alongside `CIDWATCH_*`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SERVER_ADDR") {
            self.exporter.address = v;
        }
        if let Some(p) = lookup("SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.exporter.port = p;
        }
        if let Some(v) = lookup("SAVE_DIR") {
            self.storage.save_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TIKA_URL") {
            self.collaborators.extractor_url = v;
        }
        if let Some(v) = lookup("GATEWAY_URL") {
            self.collaborators.gateway_url = v;
        }
        if let Some(v) = lookup("CIDWATCH_COLLABORATORS__SEARCH_INDEX_URL") {
            self.collaborators.search_index_url = v;
        }
        if let Some(v) = lookup("CIDWATCH_EXPORTER__RECONNECT") {
            self.exporter.reconnect = v == "true" || v == "1";
        }
        if let Some(k) = lookup("CIDWATCH_STORAGE__SEEN_STORE").and_then(|v| parse_enum(&v)) {
            self.storage.seen_store = k;
        }
        if let Some(r) = lookup("CIDWATCH_STORAGE__ROTATION").and_then(|v| parse_enum(&v)) {
            self.storage.rotation = r;
        }
        if let Some(s) =
            lookup("CIDWATCH_COLLABORATORS__METADATA_SOURCE").and_then(|v| parse_enum(&v))
        {
            self.collaborators.metadata_source = s;
        }
    }
}

/// Parse a bare enum name using its serde spelling.
fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    use serde::de::IntoDeserializer;
    let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        value.into_deserializer();
    T::deserialize(de).ok()
}
