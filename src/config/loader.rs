//! Settings file loader and serialization.

use super::PackerSettings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_DIR: &str = ".config/packer-pro";

/// Get the global settings path: ~/.config/packer-pro/settings.json
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(SETTINGS_DIR).join("settings.json"))
}

/// Load settings from a JSON file.
pub fn load_settings_from_file(path: &Path) -> Result<PackerSettings, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Settings file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: PackerSettings =
        serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;

    Ok(settings)
}

/// Save settings to a JSON file, creating the parent directory.
pub fn save_settings_to_file(settings: &PackerSettings, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate settings path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Settings file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Settings file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Settings path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
