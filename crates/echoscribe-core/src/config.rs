//! Application configuration
//!
//! `config.json` under the app data dir, camelCase for compatibility
//! with the settings UI. Unknown fields written by other components are
//! preserved across saves.

use anyhow::Result;
use echoscribe_types::Settings;
use std::path::PathBuf;

/// Base data directory
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("echoscribe")
}

/// Directory holding one subdirectory per session
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

fn settings_path() -> PathBuf {
    data_dir().join("config.json")
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ConfigFile {
    settings: Settings,
}

/// Load settings, falling back to defaults on absence or parse failure
pub fn load_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        tracing::debug!("config.json not found at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<ConfigFile>(&content) {
            Ok(config) => {
                tracing::info!("Loaded settings from {:?}", path);
                config.settings
            }
            Err(e) => {
                tracing::warn!("Failed to parse config.json: {}", e);
                Settings::default()
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config.json: {}", e);
            Settings::default()
        }
    }
}

/// Save settings, preserving unrecognized top-level fields
pub fn save_settings(settings: &Settings) -> Result<()> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut config_value: serde_json::Value = if path.exists() {
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };

    if let Some(obj) = config_value.as_object_mut() {
        obj.insert("settings".to_string(), serde_json::to_value(settings)?);
    }

    let content = serde_json::to_string_pretty(&config_value)?;
    std::fs::write(&path, content)?;
    tracing::info!("Saved settings to {:?}", path);
    Ok(())
}
