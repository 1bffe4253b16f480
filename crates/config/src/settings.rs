// Engine settings
// Loaded from ~/.config/cellflow/engine.json (or any .json / .toml path)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing JSON settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parsing TOML settings: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported settings file extension: {0}")]
    UnsupportedFormat(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Format pattern for cells that have none of their own.
    #[serde(rename = "format.default")]
    pub default_format: String,

    /// Upper bound on destination cells in one fill.
    #[serde(rename = "fill.maxCells")]
    pub max_fill_cells: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_format: "General".to_string(),
            max_fill_cells: 1_000_000,
        }
    }
}

impl EngineSettings {
    /// Default settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellflow");
        config_dir.join("engine.json")
    }

    /// Load from the default path. A missing file means defaults.
    pub fn load() -> Result<Self, SettingsError> {
        let path = Self::config_path();
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from a `.json` or `.toml` file.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") => Self::from_toml_str(&contents)?,
            other => return Err(SettingsError::UnsupportedFormat(other.unwrap_or("").to_string())),
        };
        log::info!("loaded engine settings from {}", path.display());
        Ok(settings)
    }

    /// Parse JSON, ignoring lines that start with `//`.
    pub fn from_json_str(contents: &str) -> Result<Self, SettingsError> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        let settings: Self = serde_json::from_str(&cleaned)?;
        settings.validate()
    }

    /// Parse TOML. Keys are the same as the JSON ones, quoted.
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()
    }

    fn validate(self) -> Result<Self, SettingsError> {
        if self.default_format.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "format.default",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_fill_cells == 0 {
            return Err(SettingsError::Invalid {
                field: "fill.maxCells",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_format, "General");
        assert_eq!(settings.max_fill_cells, 1_000_000);
    }

    #[test]
    fn test_json_with_comments() {
        let json = r#"{
    // Number format for unformatted cells
    "format.default": "0.00",
    "fill.maxCells": 500
}"#;
        let settings = EngineSettings::from_json_str(json).unwrap();
        assert_eq!(settings.default_format, "0.00");
        assert_eq!(settings.max_fill_cells, 500);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let settings = EngineSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_toml() {
        let settings = EngineSettings::from_toml_str("\"fill.maxCells\" = 42\n").unwrap();
        assert_eq!(settings.max_fill_cells, 42);
        assert_eq!(settings.default_format, "General");
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineSettings::from_json_str(r#"{"fill.maxCells": 0}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "fill.maxCells", .. }));

        let err = EngineSettings::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn test_load_from_rejects_unknown_extension() {
        let path = std::env::temp_dir().join("cellflow-settings-test.yaml");
        fs::write(&path, "x: 1").unwrap();
        let err = EngineSettings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat(ext) if ext == "yaml"));
        let _ = fs::remove_file(&path);
    }
}
