use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

fn default_theme() -> String {
    "dark".to_owned()
}

/// Persisted user preferences.
///
/// The configuration screen itself lives in the front-end; this is only the
/// record it reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Stable category keys the user wants shown, in display order.
    #[serde(default)]
    pub selected_categories: Vec<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selected_categories: Vec::new(),
            theme: default_theme(),
        }
    }
}

impl AppConfig {
    /// Default config file under the user's configuration directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("kgnews").join("config.json"))
    }

    /// Load from the default location; any failure falls back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load_from(&path),
            Err(err) => {
                warn!(error = %err, "using default configuration");
                Self::default()
            }
        }
    }

    /// Load from an explicit path. A missing or corrupted file falls back
    /// to the default configuration, never an error.
    pub fn load_from(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "config not found, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupted config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        info!(path = %path.display(), "saved configuration");
        Ok(())
    }
}
