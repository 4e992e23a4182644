//! Persisted engine settings.
//!
//! The engine only reads what it needs from the locally persisted account
//! state: the access token and active team written by the auth layer, plus
//! the remembered mount-home consent it writes itself. A missing file yields
//! defaults; nothing here manages sessions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_API_HOST;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Bearer token for the catalog service.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Active team id used to filter catalog queries.
    #[serde(default)]
    pub team_id: Option<String>,

    /// Active team name used in canonical image tags.
    #[serde(default)]
    pub team_name: Option<String>,

    /// Remembered answer to the "always allow mounting home" prompt.
    /// `None` means the user has not been asked to remember yet.
    #[serde(default)]
    pub always_mount_home: Option<bool>,
}

impl Settings {
    /// Load settings from the default location, falling back to defaults
    /// when no file exists yet.
    pub fn load() -> Result<Self> {
        match settings_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Persist settings to the default location, creating the config
    /// directory if needed.
    pub fn save(&self) -> Result<()> {
        let path = settings_path().ok_or_else(|| {
            EngineError::Validation("could not determine a config directory".to_string())
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Catalog endpoint: `OPS_API_HOST` wins over the built-in default.
    pub fn api_endpoint(&self) -> String {
        std::env::var("OPS_API_HOST").unwrap_or_else(|_| DEFAULT_API_HOST.to_string())
    }
}

fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("opsctl").join("settings.yml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        assert!(!path.exists());

        let settings = Settings::load_or_default(&path).unwrap();
        assert!(settings.access_token.is_none());
        assert!(settings.always_mount_home.is_none());
    }

    #[test]
    fn round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yml");

        let settings = Settings {
            access_token: Some("tok".to_string()),
            team_id: Some("team-1".to_string()),
            team_name: Some("acme".to_string()),
            always_mount_home: Some(true),
        };
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("tok"));
        assert_eq!(loaded.team_name.as_deref(), Some("acme"));
        assert_eq!(loaded.always_mount_home, Some(true));
    }
}
