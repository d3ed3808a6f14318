//! Session Configuration
//!
//! Engine settings stored in TOML format, plus the validation applied
//! before they are handed to the recognition engine.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::OcrError;

/// Recognition engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Legacy character-model engine only
    TesseractOnly,
    /// Neural line-model engine only
    LstmOnly,
    /// Both engines combined
    TesseractLstmCombined,
    /// Whatever the engine considers its default
    #[default]
    Default,
}

/// Page segmentation applied before recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Fully automatic page segmentation
    Auto,
    /// Assume a single uniform block of text
    #[default]
    SingleBlock,
    /// Treat the image as a single text line
    SingleLine,
    /// Treat the image as a single word
    SingleWord,
    /// Find sparse text in no particular order
    SparseText,
}

/// Settings for one engine session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory containing a `tessdata` subdirectory with the model files
    pub data_path: PathBuf,
    /// Language code(s), `+`-separated for multi-language recognition
    pub language: String,
    /// Engine selection
    pub engine_mode: EngineMode,
    /// Page segmentation
    pub segmentation_mode: SegmentationMode,
    /// String-keyed engine variable overrides applied at init
    pub variables: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::new(),
            language: "eng".to_string(),
            engine_mode: EngineMode::default(),
            segmentation_mode: SegmentationMode::default(),
            variables: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// The individual language codes requested by this config
    pub fn languages(&self) -> Vec<&str> {
        self.language.split('+').collect()
    }

    /// Check the config before it reaches the engine.
    ///
    /// Rejects an unset or missing data path, a data path without a
    /// `tessdata` subdirectory, and malformed language codes. Model files
    /// themselves are the engine's business.
    pub fn validate(&self) -> std::result::Result<(), OcrError> {
        if self.data_path.as_os_str().is_empty() {
            return Err(OcrError::InvalidConfig {
                reason: "data path is not set".to_string(),
            });
        }
        if !self.data_path.is_dir() {
            return Err(OcrError::InvalidConfig {
                reason: format!("data path {} is not a directory", self.data_path.display()),
            });
        }
        if !self.data_path.join("tessdata").is_dir() {
            return Err(OcrError::InvalidConfig {
                reason: format!(
                    "data path {} has no tessdata directory",
                    self.data_path.display()
                ),
            });
        }

        if self.language.is_empty() {
            return Err(OcrError::InvalidConfig {
                reason: "language is empty".to_string(),
            });
        }
        for lang in self.languages() {
            if lang.is_empty()
                || !lang
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(OcrError::InvalidConfig {
                    reason: format!("malformed language code '{lang}'"),
                });
            }
        }

        Ok(())
    }
}

/// Get the default engine data directory
pub fn default_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "ocrkit", "OcrKit")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<SessionConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: SessionConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &SessionConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn staged_data_dir(languages: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let tessdata = dir.path().join("tessdata");
        std::fs::create_dir(&tessdata).unwrap();
        for lang in languages {
            std::fs::write(tessdata.join(format!("{lang}.traineddata")), b"model").unwrap();
        }
        dir
    }

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();

        assert!(config.data_path.as_os_str().is_empty());
        assert_eq!(config.language, "eng");
        assert_eq!(config.engine_mode, EngineMode::Default);
        assert_eq!(config.segmentation_mode, SegmentationMode::SingleBlock);
        assert!(config.variables.is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SessionConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.language, parsed.language);
        assert_eq!(config.engine_mode, parsed.engine_mode);
        assert_eq!(config.segmentation_mode, parsed.segmentation_mode);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = SessionConfig::default();
        config.language = "eng+deu".to_string();
        config.engine_mode = EngineMode::LstmOnly;
        config
            .variables
            .insert("tessedit_char_whitelist".to_string(), "0123456789".to_string());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.language, "eng+deu");
        assert_eq!(parsed.engine_mode, EngineMode::LstmOnly);
        assert_eq!(
            parsed.variables.get("tessedit_char_whitelist"),
            Some(&"0123456789".to_string())
        );
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = SessionConfig::default();
        config.language = "jpn".to_string();

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.language, "jpn");
        assert_eq!(loaded.engine_mode, config.engine_mode);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_languages_split() {
        let mut config = SessionConfig::default();
        config.language = "eng+chi_sim+deu".to_string();
        assert_eq!(config.languages(), vec!["eng", "chi_sim", "deu"]);
    }

    #[test]
    fn test_validate_accepts_staged_dir() {
        let dir = staged_data_dir(&["eng"]);
        let config = SessionConfig {
            data_path: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unset_or_missing_path() {
        let config = SessionConfig::default();
        assert!(matches!(
            config.validate(),
            Err(OcrError::InvalidConfig { .. })
        ));

        let config = SessionConfig {
            data_path: PathBuf::from("/nonexistent/ocr-data"),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OcrError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_dir_without_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            data_path: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OcrError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_language() {
        let dir = staged_data_dir(&["eng"]);
        for bad in ["", "ENG", "en g", "eng++deu", "eng+"] {
            let config = SessionConfig {
                data_path: dir.path().to_path_buf(),
                language: bad.to_string(),
                ..SessionConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(OcrError::InvalidConfig { .. })),
                "language '{bad}' should be rejected"
            );
        }
    }
}
