//! Service configuration resolution
//!
//! Every test here clears and sets process environment variables, so all of
//! them run #[serial].

use onboard_api::config::{
    Args, ServiceConfig, DEFAULT_HOST, DEFAULT_MAX_FILE_SIZE, DEFAULT_OCR_TIMEOUT_MS,
    DEFAULT_OCR_URL, DEFAULT_PORT,
};
use onboard_common::config::TomlConfig;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const VARS: &[&str] = &[
    "ONBOARD_ROOT_FOLDER",
    "OCR_SERVICE_URL",
    "OCR_API_KEY",
    "OCR_SEND_AUTH",
    "OCR_TIMEOUT",
    "OCR_PROMPT",
    "OCR_MODEL",
    "GEMINI_API_URL",
    "GEMINI_API_KEY",
    "MAX_FILE_SIZE",
    "ALLOWED_FILE_TYPES",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_any_source() {
    clear_env();

    let config = ServiceConfig::resolve(&Args::default(), &TomlConfig::default());

    assert_eq!(config.host, DEFAULT_HOST);
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.database_path, config.root_folder.join("onboard.db"));
    assert_eq!(config.log_level, "info");
    assert_eq!(config.ocr.url, DEFAULT_OCR_URL);
    assert_eq!(config.ocr.timeout, Duration::from_millis(DEFAULT_OCR_TIMEOUT_MS));
    assert_eq!(config.ocr.api_key, None);
    assert!(!config.ocr.send_auth);
    assert_eq!(config.gemini.api_key, None);
    assert_eq!(config.uploads.max_file_size, DEFAULT_MAX_FILE_SIZE);
    assert_eq!(config.uploads.max_files, 5);
    assert!(config.uploads.is_allowed("application/pdf"));
    assert!(!config.uploads.is_allowed("application/zip"));
}

#[test]
#[serial]
fn test_cli_then_toml_for_server_settings() {
    clear_env();
    let toml = TomlConfig::parse(
        r#"
        root_folder = "/srv/onboard"

        [server]
        host = "0.0.0.0"
        port = 8080

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    let args = Args {
        port: Some(9000),
        ..Default::default()
    };
    let config = ServiceConfig::resolve(&args, &toml);

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 9000);
    assert_eq!(config.root_folder, PathBuf::from("/srv/onboard"));
    assert_eq!(config.database_path, PathBuf::from("/srv/onboard/onboard.db"));
    assert_eq!(config.log_level, "debug");
}

#[test]
#[serial]
fn test_environment_beats_toml() {
    clear_env();
    let toml = TomlConfig::parse(
        r#"
        [ocr]
        url = "http://toml-ocr/api"
        timeout_ms = 1000

        [gemini]
        api_key = "toml-gemini-key"

        [uploads]
        max_file_size = 2048
        "#,
    )
    .unwrap();

    env::set_var("OCR_SERVICE_URL", "http://env-ocr/api");
    env::set_var("GEMINI_API_KEY", "env-gemini-key");
    env::set_var("ALLOWED_FILE_TYPES", "application/pdf, image/png");

    let config = ServiceConfig::resolve(&Args::default(), &toml);

    assert_eq!(config.ocr.url, "http://env-ocr/api");
    assert_eq!(config.ocr.timeout, Duration::from_millis(1000));
    assert_eq!(config.gemini.api_key.as_deref(), Some("env-gemini-key"));
    assert_eq!(config.uploads.max_file_size, 2048);
    assert_eq!(config.uploads.allowed_types, vec!["application/pdf", "image/png"]);
    assert!(!config.uploads.is_allowed("text/plain"));

    clear_env();
}

#[test]
#[serial]
fn test_ocr_auth_is_opt_in() {
    clear_env();
    env::set_var("OCR_API_KEY", "ocr-key");
    let config = ServiceConfig::resolve(&Args::default(), &TomlConfig::default());
    assert_eq!(config.ocr.api_key.as_deref(), Some("ocr-key"));
    assert!(!config.ocr.send_auth);

    let toml = TomlConfig::parse("[ocr]\nsend_auth = true\n").unwrap();
    assert!(ServiceConfig::resolve(&Args::default(), &toml).ocr.send_auth);

    env::set_var("OCR_SEND_AUTH", "false");
    assert!(!ServiceConfig::resolve(&Args::default(), &toml).ocr.send_auth);

    clear_env();
}

#[test]
#[serial]
fn test_placeholder_key_treated_as_absent() {
    clear_env();
    env::set_var("GEMINI_API_KEY", "YOUR_GEMINI_API_KEY");
    let toml = TomlConfig::parse("[gemini]\napi_key = \"  \"\n").unwrap();

    let config = ServiceConfig::resolve(&Args::default(), &toml);
    assert_eq!(config.gemini.api_key, None);

    clear_env();
}

#[test]
#[serial]
fn test_explicit_database_path_wins() {
    clear_env();
    let toml = TomlConfig::parse("database = \"/toml/app.db\"\n").unwrap();
    let args = Args {
        database: Some(PathBuf::from("/cli/app.db")),
        ..Default::default()
    };

    assert_eq!(
        ServiceConfig::resolve(&args, &toml).database_path,
        PathBuf::from("/cli/app.db")
    );
    assert_eq!(
        ServiceConfig::resolve(&Args::default(), &toml).database_path,
        PathBuf::from("/toml/app.db")
    );
}
