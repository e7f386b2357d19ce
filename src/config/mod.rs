//! Configuration for Packer Pro.
//!
//! # Module Structure
//!
//! - `loader`: settings file location, JSON load/save and path validation
//! - `tables`: compiled-in lookup tables (stdlib set, package map, plugins)
//!
//! # Settings Management
//!
//! `PackerSettings` holds the user's persisted build preferences. The
//! `SettingsManager` reads them from `~/.config/packer-pro/settings.json`
//! (falling back to defaults when the file is absent or unreadable) and
//! applies them onto a fresh `BuildConfiguration`.

pub mod loader;
pub mod tables;

use crate::error::ConfigError;
use crate::models::{Backend, BuildConfiguration, CompilerPreference, CompressionMode};
use std::path::{Path, PathBuf};

/// Persisted user preferences.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PackerSettings {
    pub backend: Backend,
    pub compression: CompressionMode,
    pub compiler: CompilerPreference,
    pub console: bool,
    pub trim_imports: bool,
    pub auto_check_dependencies: bool,
    /// Package index mirror for installs
    pub index_url: Option<String>,
    /// Parallel jobs; host CPU count when unset
    pub jobs: Option<usize>,
    /// Extra lookup tables merged over the built-in ones
    pub tables_override: Option<PathBuf>,
    /// Bundled tools root; defaults to `tools/` next to the executable
    pub tools_dir: Option<PathBuf>,
}

impl Default for PackerSettings {
    fn default() -> Self {
        PackerSettings {
            backend: Backend::PyInstaller,
            compression: CompressionMode::DoubleLayer,
            compiler: CompilerPreference::Auto,
            console: true,
            trim_imports: false,
            auto_check_dependencies: true,
            index_url: None,
            jobs: None,
            tables_override: None,
            tools_dir: None,
        }
    }
}

impl PackerSettings {
    /// Copy the persisted preferences onto a build configuration.
    pub fn apply_to(&self, config: &mut BuildConfiguration) {
        config.backend = self.backend;
        config.compression = self.compression;
        config.compiler = self.compiler;
        config.console = self.console;
        config.trim_imports = self.trim_imports;
        config.auto_check_dependencies = self.auto_check_dependencies;
        config.index_url = self.index_url.clone();
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
    }
}

/// Settings persistence front end.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from the global path, or return defaults.
    pub fn load() -> PackerSettings {
        match loader::get_global_settings_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                log::warn!("[Config] {}; using default settings", e);
                PackerSettings::default()
            }
        }
    }

    /// Load settings from `path`. A missing or malformed file yields defaults.
    pub fn load_from(path: &Path) -> PackerSettings {
        match loader::load_settings_from_file(path) {
            Ok(settings) => settings,
            Err(ConfigError::FileNotFound(_)) => PackerSettings::default(),
            Err(e) => {
                log::warn!(
                    "[Config] Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                PackerSettings::default()
            }
        }
    }

    /// Save settings to the global path.
    pub fn save(settings: &PackerSettings) -> Result<PathBuf, ConfigError> {
        let path = loader::get_global_settings_path()?;
        loader::save_settings_to_file(settings, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_to_overrides_defaults() {
        let settings = PackerSettings {
            backend: Backend::Nuitka,
            compression: CompressionMode::InnerOnly,
            console: false,
            jobs: Some(0),
            index_url: Some("https://mirror.example/simple".to_string()),
            ..PackerSettings::default()
        };
        let mut config = BuildConfiguration::new("/tmp/app.py", "/usr/bin/python3");
        settings.apply_to(&mut config);

        assert_eq!(config.backend, Backend::Nuitka);
        assert_eq!(config.compression, CompressionMode::InnerOnly);
        assert!(!config.console);
        assert_eq!(config.jobs, 1);
        assert_eq!(config.index_url.as_deref(), Some("https://mirror.example/simple"));
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SettingsManager::load_from(&path), PackerSettings::default());
    }

    #[test]
    fn test_partial_settings_use_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "backend": "nuitka", "compression": 3 }"#).unwrap();

        let settings = SettingsManager::load_from(&path);
        assert_eq!(settings.backend, Backend::Nuitka);
        assert_eq!(settings.compression, CompressionMode::None);
        assert!(settings.auto_check_dependencies);
    }
}
