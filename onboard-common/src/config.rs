//! Bootstrap configuration and root folder resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: the service logs a warning and
//! starts on defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Directory and file name used under the OS config/data dirs
pub const APP_DIR_NAME: &str = "onboard";
pub const DEFAULT_DATABASE_FILE: &str = "onboard.db";

/// Placeholder values shipped in sample configs; never real credentials
const PLACEHOLDER_KEYS: &[&str] = &["YOUR_GEMINI_API_KEY", "YOUR_OCR_API_KEY", "changeme"];

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub server: ServerSection,
    pub logging: LoggingConfig,
    pub ocr: OcrSection,
    pub gemini: GeminiSection,
    pub uploads: UploadSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    /// Send the API key as a bearer token (the service accepts plain form posts)
    pub send_auth: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub max_file_size: Option<usize>,
    pub allowed_types: Option<Vec<String>>,
}

impl TomlConfig {
    /// Parse a config file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from an explicit path, else the platform default location if any
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }
}

/// `~/.config/onboard/config.toml` (or the platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./onboard_data"))
}

/// Resolve the root folder: CLI → env var → TOML → default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Some(path) = env_value(env_var_name) {
        return PathBuf::from(path);
    }
    if let Some(path) = &toml.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// Non-empty environment variable value
pub fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, warning (and ignoring it) when malformed
pub fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_value(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

/// A credential is usable when non-blank and not a sample placeholder
pub fn is_valid_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && !PLACEHOLDER_KEYS.iter().any(|p| p.eq_ignore_ascii_case(key))
}

/// First usable credential among the candidates, in priority order
pub fn resolve_key<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|k| is_valid_key(k))
        .map(|k| k.trim().to_string())
}

/// Make sure the root folder exists
pub fn ensure_root_folder(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!(path = %path.display(), "Created root folder");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_keys_are_invalid() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
        assert!(!is_valid_key("YOUR_GEMINI_API_KEY"));
        assert!(is_valid_key("AIzaSyReal"));
    }

    #[test]
    fn test_resolve_key_priority() {
        assert_eq!(
            resolve_key([None, Some("YOUR_GEMINI_API_KEY"), Some("second"), Some("third")]),
            Some("second".to_string())
        );
        assert_eq!(resolve_key([None, Some("")]), None);
    }

    #[test]
    fn test_parse_sections() {
        let config = TomlConfig::parse(
            r#"
            root_folder = "/srv/onboard"

            [server]
            port = 8080

            [logging]
            level = "debug"

            [ocr]
            timeout_ms = 1000

            [uploads]
            allowed_types = ["application/pdf"]
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/onboard")));
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.server.host, None);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.ocr.timeout_ms, Some(1000));
        assert_eq!(
            config.uploads.allowed_types,
            Some(vec!["application/pdf".to_string()])
        );
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }
}
