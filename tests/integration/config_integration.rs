//! Integration tests for Configuration System

use super::test_utils::with_env;
use confluence_bulk::config::{CheckpointBackend, ConfigLoader};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(path: PathBuf, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_project_file_overrides_global_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let config = with_env(&home, &[], || {
        write(
            ConfigLoader::global_config_path().unwrap(),
            r#"
[confluence]
base_url = "https://global.atlassian.net"
email = "global@example.com"

[execution]
batch_size = 40
confirm_threshold = 10
"#,
        );
        write(
            ConfigLoader::project_config_path(project.path()),
            r#"
[execution]
batch_size = 20

[checkpoint]
backend = "sled"
"#,
        );
        ConfigLoader::load(project.path())
    })
    .unwrap();

    assert_eq!(
        config.confluence.base_url.as_deref(),
        Some("https://global.atlassian.net")
    );
    assert_eq!(config.execution.batch_size, 20);
    assert_eq!(config.execution.confirm_threshold, 10);
    assert_eq!(config.checkpoint.backend, CheckpointBackend::Sled);
}

#[test]
fn test_credential_variables_win_over_files() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write(
        ConfigLoader::project_config_path(project.path()),
        "[confluence]\nbase_url = \"https://file.atlassian.net\"\nemail = \"file@example.com\"\n",
    );

    let config = with_env(
        &home,
        &[
            ("CONFLUENCE_URL", "https://env.atlassian.net"),
            ("CONFLUENCE_EMAIL", "env@example.com"),
            ("CONFLUENCE_API_TOKEN", "secret"),
        ],
        || ConfigLoader::load(project.path()),
    )
    .unwrap();

    let (url, _credentials) = config.confluence.resolve().unwrap();
    assert_eq!(url, "https://env.atlassian.net");
    assert_eq!(config.confluence.email.as_deref(), Some("env@example.com"));
    assert_eq!(config.confluence.api_token.as_deref(), Some("secret"));
}

#[test]
fn test_missing_credentials_are_reported_by_name() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let config = with_env(&home, &[], || ConfigLoader::load(project.path())).unwrap();
    let missing = config.confluence.resolve().unwrap_err();
    assert!(!missing.is_empty());
}

#[test]
fn test_explicit_config_file_skips_project_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write(
        ConfigLoader::project_config_path(project.path()),
        "[execution]\nworkers = 9\n",
    );
    let explicit = project.path().join("ci.toml");
    write(explicit.clone(), "[execution]\nworkers = 2\n\n[retry]\nmax_retries = 5\n");

    let config = with_env(&home, &[], || {
        ConfigLoader::load_with_override(project.path(), Some(&explicit))
    })
    .unwrap();

    assert_eq!(config.execution.workers, 2);
    assert_eq!(config.retry.max_retries, 5);
}

#[test]
fn test_environment_overrides_nested_keys() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let config = with_env(
        &home,
        &[
            ("CONFLUENCE_BULK__RETRY__MAX_RETRIES", "1"),
            ("CONFLUENCE_BULK__LOGGING__LEVEL", "debug"),
        ],
        || ConfigLoader::load(project.path()),
    )
    .unwrap();

    assert_eq!(config.retry.max_retries, 1);
    assert_eq!(config.logging.level, "debug");
}
