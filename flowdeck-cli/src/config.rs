/// Configuration for the flowdeck CLI.
/// Reads flowdeck.json from ~/.config/flowdeck/flowdeck.json (or platform equivalent).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use flowdeck_core::history::MAX_HISTORY_SIZE;
use flowdeck_core::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowdeckConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub include_demo_users: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_history_capacity() -> usize {
    MAX_HISTORY_SIZE
}

impl Default for FlowdeckConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: default_log_level(),
            history_capacity: default_history_capacity(),
            include_demo_users: false,
        }
    }
}

impl FlowdeckConfig {
    /// Configured data directory, or ~/.local/share/flowdeck.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("flowdeck")
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            history_capacity: self.history_capacity,
        }
    }
}

/// Default config path: ~/.config/flowdeck/flowdeck.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowdeck")
        .join("flowdeck.json")
}

/// Load config from path. Returns default if the file is missing or invalid.
pub fn load_config(path: &Path) -> FlowdeckConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {}: {}", path.display(), e);
            FlowdeckConfig::default()
        }),
        Err(_) => {
            log::info!("No config at {}, using defaults", path.display());
            FlowdeckConfig::default()
        }
    }
}

/// Log level from the config file, read quietly before logging exists.
pub fn peek_log_level(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str::<FlowdeckConfig>(&content).ok())
        .map(|config| config.log_level)
        .unwrap_or_else(default_log_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.json"));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.history_capacity, MAX_HISTORY_SIZE);
        assert!(!config.include_demo_users);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowdeck.json");
        fs::write(&path, r#"{"dataDir": "/srv/boards", "historyCapacity": 10}"#).unwrap();

        let config = load_config(&path);
        assert_eq!(config.data_dir(), PathBuf::from("/srv/boards"));
        assert_eq!(config.session_config().history_capacity, 10);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_peek_log_level() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowdeck.json");
        assert_eq!(peek_log_level(&path), "warn");
        fs::write(&path, r#"{"logLevel": "debug"}"#).unwrap();
        assert_eq!(peek_log_level(&path), "debug");
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowdeck.json");
        fs::write(&path, "{ nope").unwrap();
        assert_eq!(load_config(&path).history_capacity, MAX_HISTORY_SIZE);
    }
}
