use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ai::gemini::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_IMAGE_MODEL};
use crate::ai::gemini_live::DEFAULT_LIVE_MODEL;
use crate::locale;

/// Environment variables checked, in order, for the API key.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no configuration directory on this platform")]
    NoConfigDir,
    #[error("API key is not set (settings file or {})", API_KEY_ENV_VARS.join("/"))]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub live_model: String,
    pub system_instruction: String,
    pub recognition_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            image_model: DEFAULT_IMAGE_MODEL.into(),
            live_model: DEFAULT_LIVE_MODEL.into(),
            system_instruction: locale::DEFAULT_SYSTEM_INSTRUCTION.into(),
            recognition_language: "ar-SA".into(),
        }
    }
}

pub fn config_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join("smart-studio").join("settings.toml"))
}

impl Settings {
    /// Load from `path`; a missing file gives the defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from the platform config directory and apply env overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::load_from(&config_path()?)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// The first non-empty variable from [`API_KEY_ENV_VARS`] wins over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|value| !value.trim().is_empty())
        {
            self.api_key = key;
        }
    }

    pub fn api_key(&self) -> Result<&str, SettingsError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(SettingsError::MissingApiKey);
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.chat_model, "gemini-2.5-flash");
        assert_eq!(settings.recognition_language, "ar-SA");
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            api_key: "k".into(),
            chat_model: "custom".into(),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "apiKey = \"abc\"\n").unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.api_key, "abc");
        assert_eq!(settings.image_model, DEFAULT_IMAGE_MODEL);
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "apiKey = [").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn env_override_prefers_gemini_key() {
        let mut settings = Settings {
            api_key: "file".into(),
            ..Settings::default()
        };
        settings.apply_env_overrides(|name| match name {
            "GEMINI_API_KEY" => Some("gemini".into()),
            "API_KEY" => Some("generic".into()),
            _ => None,
        });
        assert_eq!(settings.api_key, "gemini");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut settings = Settings {
            api_key: "file".into(),
            ..Settings::default()
        };
        settings.apply_env_overrides(|name| (name == "GEMINI_API_KEY").then(|| " ".into()));
        assert_eq!(settings.api_key, "file");
    }

    #[test]
    fn empty_api_key_is_an_error() {
        assert!(matches!(
            Settings::default().api_key(),
            Err(SettingsError::MissingApiKey)
        ));
    }
}
