//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Loading a complete YAML file
//! - Environment variable overrides, including values from a dotenv file
//! - Validation failures that stop the service from starting
//! - Derived settings (post action, retry policy, auth header)

use camino::Utf8PathBuf;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use xml_watcher::config::ConfigError;
use xml_watcher::models::{AuthKind, AuthMode, PostAction};
use xml_watcher::ConfigManager;

fn create_test_config(body: impl FnOnce(&str) -> String) -> (TempDir, Utf8PathBuf, String) {
    let temp_dir = TempDir::new().unwrap();
    let watch = temp_dir.path().join("inbox");
    fs::create_dir(&watch).unwrap();
    let watch = watch.to_str().unwrap().to_string();

    let path = Utf8PathBuf::try_from(temp_dir.path().join("config.yaml")).unwrap();
    fs::write(&path, body(&watch)).unwrap();
    (temp_dir, path, watch)
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_load_full_config() {
    let (_temp_dir, path, watch) = create_test_config(|watch| {
        format!(
            r#"
watch_folder: "{watch}"
api:
  endpoint: "https://api.example.com/upload"
  timeout: 45
  retry_attempts: 4
  retry_delay: 2
  auth:
    type: bearer
    token: "abc123"
processing:
  patterns: ["*.xml", "invoice_*.txt"]
  process_existing: true
  delete_after_upload: false
  processed_folder: "/srv/processed"
logging:
  level: DEBUG
  file: ""
  backup_count: 3
  max_size: 20
  colored_output: false
service:
  name: "invoice-watcher"
  check_interval: 0.5
  recursive: false
  max_concurrent_uploads: 2
"#
        )
    });

    let config = ConfigManager::new(&path).load_with_env(env_from(&[])).unwrap();

    assert_eq!(config.watch_folder, watch);
    assert_eq!(config.api.endpoint, "https://api.example.com/upload");
    assert_eq!(config.api.timeout(), Duration::from_secs(45));
    assert_eq!(config.api.auth.kind, AuthKind::Bearer);
    assert_eq!(config.api.auth_mode(), AuthMode::Bearer("abc123".to_string()));
    assert_eq!(config.processing.patterns, vec!["*.xml", "invoice_*.txt"]);
    assert!(config.processing.process_existing);
    assert_eq!(
        config.post_action(),
        PostAction::MoveTo(Utf8PathBuf::from("/srv/processed"))
    );
    assert_eq!(config.logging.level, "DEBUG");
    assert!(!config.logging.colored_output);
    assert_eq!(config.logging.max_size, Some(20));
    assert_eq!(config.service.name, "invoice-watcher");

    let retry = config.api.retry_policy();
    assert_eq!(retry.attempts, 4);
    assert_eq!(retry.delay, Duration::from_secs(2));

    let dispatch = config.dispatch_settings();
    assert_eq!(dispatch.max_concurrent, 2);
    assert_eq!(dispatch.poll_interval, Duration::from_millis(500));

    let spec = config.watch_spec();
    assert!(!spec.recursive);
}

#[test]
fn test_env_overrides_file_values() {
    let other = TempDir::new().unwrap();
    let other_watch = other.path().to_str().unwrap().to_string();

    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!(
            "watch_folder: \"{watch}\"\napi:\n  endpoint: http://file/upload\n  auth:\n    type: bearer\n    token: from-file\nlogging:\n  level: INFO\n"
        )
    });

    let env = env_from(&[
        ("WATCH_FOLDER", other_watch.as_str()),
        ("API_ENDPOINT", "http://env/upload"),
        ("API_TOKEN", "from-env"),
        ("LOG_LEVEL", "WARNING"),
    ]);
    let config = ConfigManager::new(&path).load_with_env(env).unwrap();

    assert_eq!(config.watch_folder, other_watch);
    assert_eq!(config.api.endpoint, "http://env/upload");
    assert_eq!(config.api.auth.token.as_deref(), Some("from-env"));
    assert_eq!(config.logging.level, "WARNING");
}

#[test]
fn test_env_file_overrides_endpoint() {
    let (temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}\"\napi:\n  endpoint: http://file/upload\n")
    });
    let env_file = Utf8PathBuf::try_from(temp_dir.path().join(".env")).unwrap();
    fs::write(
        &env_file,
        "# local overrides\nAPI_ENDPOINT=http://dotenv/upload\nLOG_LEVEL=DEBUG\n",
    )
    .unwrap();

    let config = ConfigManager::new(&path)
        .with_env_file(&env_file)
        .load()
        .unwrap();

    assert_eq!(config.api.endpoint, "http://dotenv/upload");
    assert_eq!(config.logging.level, "DEBUG");
}

#[test]
fn test_missing_env_file_is_ignored() {
    let (temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}\"\napi:\n  endpoint: http://file/upload\n")
    });

    let config = ConfigManager::new(&path)
        .with_env_file(Utf8PathBuf::try_from(temp_dir.path().join("absent.env")).unwrap())
        .load()
        .unwrap();
    assert!(!config.api.endpoint.is_empty());
}

#[test]
fn test_malformed_env_file_rejected() {
    let (temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}\"\napi:\n  endpoint: http://file/upload\n")
    });
    let env_file = Utf8PathBuf::try_from(temp_dir.path().join(".env")).unwrap();
    fs::write(&env_file, "API_ENDPOINT='unterminated\n").unwrap();

    let err = ConfigManager::new(&path)
        .with_env_file(&env_file)
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::EnvFile { .. }));
}

#[test]
fn test_empty_env_value_does_not_override() {
    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}\"\napi:\n  endpoint: http://file/upload\n")
    });

    let config = ConfigManager::new(&path)
        .load_with_env(env_from(&[("API_ENDPOINT", "")]))
        .unwrap();
    assert_eq!(config.api.endpoint, "http://file/upload");
}

#[test]
fn test_delete_takes_precedence_over_move() {
    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!(
            "watch_folder: \"{watch}\"\napi:\n  endpoint: http://x\nprocessing:\n  delete_after_upload: true\n  processed_folder: /tmp/done\n"
        )
    });

    let config = ConfigManager::new(&path).load_with_env(env_from(&[])).unwrap();
    assert_eq!(config.post_action(), PostAction::Delete);
}

#[test]
fn test_missing_watch_folder_rejected() {
    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}/nope\"\napi:\n  endpoint: http://x\n")
    });

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::WatchFolderMissing(_)));
}

#[test]
fn test_watch_folder_must_be_directory() {
    let (temp_dir, path, _watch) = create_test_config(|_| String::new());
    let file = temp_dir.path().join("plain.txt");
    fs::write(&file, "x").unwrap();
    fs::write(
        &path,
        format!(
            "watch_folder: \"{}\"\napi:\n  endpoint: http://x\n",
            file.to_str().unwrap()
        ),
    )
    .unwrap();

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::WatchFolderNotDirectory(_)));
}

#[test]
fn test_missing_watch_folder_field_rejected() {
    let (_temp_dir, path, _watch) =
        create_test_config(|_| "api:\n  endpoint: http://x\n".to_string());

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("watch_folder")));
}

#[test]
fn test_malformed_yaml_rejected() {
    let (_temp_dir, path, _watch) =
        create_test_config(|_| "watch_folder: [unterminated\n".to_string());

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Load { .. }));
}

#[test]
fn test_zero_retry_attempts_rejected() {
    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!("watch_folder: \"{watch}\"\napi:\n  endpoint: http://x\n  retry_attempts: 0\n")
    });

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_basic_auth_requires_both_credentials() {
    let (_temp_dir, path, _watch) = create_test_config(|watch| {
        format!(
            "watch_folder: \"{watch}\"\napi:\n  endpoint: http://x\n  auth:\n    type: basic\n    username: svc\n"
        )
    });

    let err = ConfigManager::new(&path)
        .load_with_env(env_from(&[]))
        .unwrap_err();
    assert!(err.to_string().contains("basic authentication"));
}

#[test]
fn test_resolve_prefers_explicit_path() {
    let manager = ConfigManager::resolve(Some(camino::Utf8Path::new("/etc/watcher.yaml")));
    assert_eq!(manager.config_path().as_str(), "/etc/watcher.yaml");
}
