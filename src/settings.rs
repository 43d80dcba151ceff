pub use crate::settings_types::*;
use crate::storage_dir;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

impl Settings {
    pub fn path() -> PathBuf {
        storage_dir().join("settings.toml")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Reads settings from `path`, creating the file with defaults when it
    /// does not exist. Unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("Creating default settings at {:?}", path);
            let default_settings = Settings::default();
            default_settings.save_to(path);
            return default_settings;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Settings>(&content) {
                Ok(s) => {
                    info!("Loaded settings from {:?}", path);
                    s
                }
                Err(e) => {
                    error!("Failed to parse settings.toml: {}", e);
                    Settings::default()
                }
            },
            Err(e) => {
                error!("Failed to read settings.toml: {}", e);
                Settings::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::path());
    }

    pub fn save_to(&self, path: &Path) {
        match toml::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    error!("Failed to write settings.toml: {}", e);
                } else {
                    info!("Saved settings to {:?}", path);
                }
            }
            Err(e) => error!("Failed to serialize settings: {}", e),
        }
    }
}
