//! Service configuration for onboard-api
//!
//! Each setting resolves CLI → environment → TOML file → compiled default.
//! CLI and environment are both handled by clap (`env = ...`); the TOML file
//! and defaults are layered underneath in [`ServiceConfig::resolve`].

use clap::Parser;
use onboard_common::config::{
    env_parsed, env_value, resolve_key, resolve_root_folder, TomlConfig, DEFAULT_DATABASE_FILE,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5001;

pub const DEFAULT_OCR_URL: &str = "http://4.236.205.190:8000/api/v1/new_agentic_ocr";
pub const DEFAULT_OCR_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_OCR_PROMPT: &str = "Extract all fields in json";
pub const DEFAULT_OCR_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";
pub const DIRECT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAPPING_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_FILES_PER_BATCH: usize = 5;
pub const DEFAULT_ALLOWED_TYPES: &[&str] =
    &["image/jpeg", "image/png", "application/pdf", "text/plain"];

/// Command-line arguments for onboard-api
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "onboard-api")]
#[command(about = "Customer onboarding API with document pre-fill")]
#[command(version)]
pub struct Args {
    /// Path to config.toml (default: platform config dir)
    #[arg(short, long, env = "ONBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "ONBOARD_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Root folder for the database and other state
    #[arg(short, long, env = "ONBOARD_ROOT_FOLDER")]
    pub root_folder: Option<PathBuf>,

    /// SQLite database file (default: <root>/onboard.db)
    #[arg(short, long, env = "ONBOARD_DATABASE")]
    pub database: Option<PathBuf>,
}

/// Third-party OCR endpoint settings
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Attach `api_key` as `Authorization: Bearer`; off by default
    pub send_auth: bool,
    pub timeout: Duration,
    pub prompt: String,
    pub model: String,
}

/// Generative-AI endpoint settings
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    /// `None` when unset, blank or a placeholder
    pub api_key: Option<String>,
    pub direct_timeout: Duration,
    pub mapping_timeout: Duration,
}

/// Upload acceptance rules
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub max_files: usize,
    pub allowed_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: MAX_FILES_PER_BATCH,
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UploadLimits {
    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub log_level: String,
    pub ocr: OcrConfig,
    pub gemini: GeminiConfig,
    pub uploads: UploadLimits,
}

impl ServiceConfig {
    /// Layer CLI/env arguments over the TOML file and compiled defaults
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Self {
        let root_folder =
            resolve_root_folder(args.root_folder.as_deref(), "ONBOARD_ROOT_FOLDER", toml);
        let database_path = args
            .database
            .clone()
            .or_else(|| toml.database.clone())
            .unwrap_or_else(|| root_folder.join(DEFAULT_DATABASE_FILE));

        let ocr_key_env = env_value("OCR_API_KEY");
        let ocr = OcrConfig {
            url: env_value("OCR_SERVICE_URL")
                .or_else(|| toml.ocr.url.clone())
                .unwrap_or_else(|| DEFAULT_OCR_URL.to_string()),
            api_key: resolve_key([ocr_key_env.as_deref(), toml.ocr.api_key.as_deref()]),
            send_auth: env_parsed("OCR_SEND_AUTH")
                .or(toml.ocr.send_auth)
                .unwrap_or(false),
            timeout: Duration::from_millis(
                env_parsed("OCR_TIMEOUT")
                    .or(toml.ocr.timeout_ms)
                    .unwrap_or(DEFAULT_OCR_TIMEOUT_MS),
            ),
            prompt: env_value("OCR_PROMPT")
                .or_else(|| toml.ocr.prompt.clone())
                .unwrap_or_else(|| DEFAULT_OCR_PROMPT.to_string()),
            model: env_value("OCR_MODEL")
                .or_else(|| toml.ocr.model.clone())
                .unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
        };

        let gemini_key_env = env_value("GEMINI_API_KEY");
        let gemini = GeminiConfig {
            api_url: env_value("GEMINI_API_URL")
                .or_else(|| toml.gemini.url.clone())
                .unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
            api_key: resolve_key([gemini_key_env.as_deref(), toml.gemini.api_key.as_deref()]),
            direct_timeout: DIRECT_EXTRACTION_TIMEOUT,
            mapping_timeout: MAPPING_TIMEOUT,
        };

        let allowed_types = env_value("ALLOWED_FILE_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .or_else(|| toml.uploads.allowed_types.clone())
            .filter(|types| !types.is_empty())
            .unwrap_or_else(|| UploadLimits::default().allowed_types);
        let uploads = UploadLimits {
            max_file_size: env_parsed("MAX_FILE_SIZE")
                .or(toml.uploads.max_file_size)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE),
            max_files: MAX_FILES_PER_BATCH,
            allowed_types,
        };

        Self {
            host: args
                .host
                .clone()
                .or_else(|| toml.server.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: args.port.or(toml.server.port).unwrap_or(DEFAULT_PORT),
            root_folder,
            database_path,
            log_level: toml.logging.level.clone(),
            ocr,
            gemini,
            uploads,
        }
    }

    /// Log the effective configuration without credentials
    pub fn log_summary(&self) {
        info!(host = %self.host, port = self.port, "Bind address");
        info!(root = %self.root_folder.display(), db = %self.database_path.display(), "Storage");
        info!(
            url = %self.ocr.url,
            model = %self.ocr.model,
            timeout_ms = self.ocr.timeout.as_millis() as u64,
            key_configured = self.ocr.api_key.is_some(),
            send_auth = self.ocr.send_auth,
            "OCR service"
        );
        if self.gemini.api_key.is_some() {
            info!(url = %self.gemini.api_url, "Gemini configured");
        } else {
            warn!("Gemini API key not configured; direct extraction disabled, basic mapping only");
        }
        info!(
            max_file_size = self.uploads.max_file_size,
            allowed = ?self.uploads.allowed_types,
            "Upload limits"
        );
    }
}
