//! # Configuration
//!
//! Mirrors `original_source/src/config.py`'s `Config` dataclass: a JSON
//! document under a platform application-data directory, loaded with
//! `serde(default)` per field and falling back to defaults whenever the
//! file is missing or unreadable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const APP_NAME: &str = "clipmesh";

fn default_server_port() -> u16 {
    2580
}
fn default_true() -> bool {
    true
}
fn default_sync_interval_ms() -> u64 {
    500
}
fn default_max_content_size() -> u64 {
    10 * 1024 * 1024
}
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}
fn default_max_total_file_size() -> u64 {
    100 * 1024 * 1024
}
fn default_chunk_threshold() -> u64 {
    10 * 1024 * 1024
}
fn default_chunk_size() -> u32 {
    256 * 1024
}
fn default_max_concurrent_transfers() -> usize {
    3
}
fn default_transfer_timeout() -> u64 {
    300
}
fn default_max_history_items() -> usize {
    100
}
fn default_theme() -> String {
    "dark".to_string()
}
fn default_tunnel_subdomain() -> String {
    String::new()
}
fn default_connection_password() -> String {
    String::new()
}

/// Persisted configuration document, keyed exactly as
/// `original_source/src/config.py`'s `Config` dataclass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server_port: u16,
    pub tunnel_enabled: bool,
    pub tunnel_subdomain: String,
    pub auto_sync: bool,
    pub sync_interval_ms: u64,
    pub max_content_size: u64,
    pub max_file_size: u64,
    pub max_total_file_size: u64,
    pub chunk_threshold: u64,
    pub chunk_size: u32,
    pub max_concurrent_transfers: usize,
    pub transfer_timeout: u64,
    pub resume_enabled: bool,
    pub history_enabled: bool,
    pub max_history_items: usize,
    pub theme: String,
    pub always_on_top: bool,
    pub minimize_to_tray: bool,
    pub start_minimized: bool,
    pub encryption_enabled: bool,
    pub connection_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            tunnel_enabled: default_true(),
            tunnel_subdomain: default_tunnel_subdomain(),
            auto_sync: default_true(),
            sync_interval_ms: default_sync_interval_ms(),
            max_content_size: default_max_content_size(),
            max_file_size: default_max_file_size(),
            max_total_file_size: default_max_total_file_size(),
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            transfer_timeout: default_transfer_timeout(),
            resume_enabled: default_true(),
            history_enabled: default_true(),
            max_history_items: default_max_history_items(),
            theme: default_theme(),
            always_on_top: false,
            minimize_to_tray: default_true(),
            start_minimized: false,
            encryption_enabled: default_true(),
            connection_password: default_connection_password(),
        }
    }
}

impl Config {
    /// The platform application-data directory this config and its
    /// sibling transfer state live under (`dirs::data_dir()/clipmesh`).
    pub fn app_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(APP_NAME))
    }

    pub fn config_file_path() -> Option<PathBuf> {
        Self::app_dir().map(|d| d.join("config.json"))
    }

    /// Load from `path`, falling back to [`Config::default`] on any
    /// error (missing file, unreadable, malformed JSON) — matches
    /// `config.py`'s `Config.load()` contract exactly.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "malformed config; using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.server_port, 2580);
        assert_eq!(c.chunk_threshold, 10 * 1024 * 1024);
        assert_eq!(c.chunk_size, 256 * 1024);
        assert_eq!(c.max_concurrent_transfers, 3);
        assert_eq!(c.theme, "dark");
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let c = Config::load_or_default(Path::new("/nonexistent/clipmesh/config.json"));
        assert_eq!(c, Config::default());
    }

    #[test]
    fn load_or_default_falls_back_on_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"not json").unwrap();
        let c = Config::load_or_default(&path);
        assert_eq!(c, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut c = Config::default();
        c.server_port = 9999;
        c.connection_password = "hunter2".into();
        c.save(&path).unwrap();
        let loaded = Config::load_or_default(&path);
        assert_eq!(loaded, c);
    }

    #[test]
    fn partial_json_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"server_port": 4000}"#).unwrap();
        let c = Config::load_or_default(&path);
        assert_eq!(c.server_port, 4000);
        assert_eq!(c.theme, "dark");
    }
}
