use crate::models::{AuthKind, ServiceConfig};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use std::collections::HashMap;
use std::io;
use thiserror::Error;

/// Configuration file used when neither `--config` nor `CONFIG_FILE` is given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Optional dotenv file read from the working directory
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Environment variable naming the configuration file
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Environment variables that override individual configuration keys
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("WATCH_FOLDER", "watch_folder"),
    ("API_ENDPOINT", "api.endpoint"),
    ("API_TOKEN", "api.auth.token"),
    ("LOG_LEVEL", "logging.level"),
];

/// Errors raised while loading or validating the configuration.
///
/// All of these are fatal: the service refuses to start rather than run degraded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Invalid environment file {path}: {source}")]
    EnvFile {
        path: Utf8PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Load {
        path: Utf8PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Required configuration field missing: {0}")]
    MissingField(&'static str),

    #[error("Watch folder does not exist: {0}")]
    WatchFolderMissing(Utf8PathBuf),

    #[error("Watch folder is not a directory: {0}")]
    WatchFolderNotDirectory(Utf8PathBuf),

    #[error("Invalid file pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

/// Locates and loads the service configuration.
///
/// Values come from the YAML file first, then from the environment overrides
/// listed in [`ENV_OVERRIDES`]. Overrides are looked up in the process
/// environment, then in the dotenv file (`.env` by default). Variables already
/// set in the process win over the file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
    env_file: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager for an explicit configuration file
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            env_file: Utf8PathBuf::from(DEFAULT_ENV_FILE),
        }
    }

    /// Read overrides from `path` instead of `.env`
    pub fn with_env_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.env_file = path.as_ref().to_path_buf();
        self
    }

    /// Pick the configuration file: explicit path, then `CONFIG_FILE` (process
    /// environment, then `.env`), then the default.
    pub fn resolve(explicit: Option<&Utf8Path>) -> Self {
        match explicit {
            Some(path) => Self::new(path),
            None => {
                let path = std::env::var(CONFIG_FILE_ENV)
                    .ok()
                    .filter(|p| !p.is_empty())
                    .or_else(|| {
                        read_env_file(Utf8Path::new(DEFAULT_ENV_FILE))
                            .ok()
                            .and_then(|mut vars| vars.remove(CONFIG_FILE_ENV))
                    })
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
                Self::new(path)
            }
        }
    }

    /// Get the configuration file path.
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Load and validate the configuration, taking overrides from the process
    /// environment and then the dotenv file.
    pub fn load(&self) -> Result<ServiceConfig, ConfigError> {
        let file_vars = read_env_file(&self.env_file)?;
        self.load_with_env(|key| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Load and validate the configuration with a custom environment lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of an environment variable, if set
    pub fn load_with_env<F>(&self, lookup: F) -> Result<ServiceConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let load_error = |source: config::ConfigError| ConfigError::Load {
            path: self.config_path.clone(),
            source,
        };

        let mut builder = Config::builder()
            .add_source(File::new(self.config_path.as_str(), FileFormat::Yaml).required(true));

        for (env_var, key) in ENV_OVERRIDES {
            let value = lookup(env_var).filter(|v| !v.is_empty());
            if value.is_some() {
                tracing::debug!("Applying environment override {} -> {}", env_var, key);
            }
            builder = builder.set_override_option(*key, value).map_err(load_error)?;
        }

        let config: ServiceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(load_error)?;

        validate(&config)?;
        Ok(config)
    }
}

/// Read `KEY=value` pairs from a dotenv file without touching the process environment.
///
/// A missing file yields an empty map.
pub fn read_env_file(path: &Utf8Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_error = |source: dotenvy::Error| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    };

    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(HashMap::new());
        }
        Err(source) => return Err(env_error(source)),
    };

    entries
        .map(|entry| entry.map_err(env_error))
        .collect()
}

/// Validate a loaded configuration.
///
/// Checks required fields, the watch folder, numeric ranges, patterns and
/// credentials.
pub fn validate(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.watch_folder.trim().is_empty() {
        return Err(ConfigError::MissingField("watch_folder"));
    }
    if config.api.endpoint.trim().is_empty() {
        return Err(ConfigError::MissingField("api.endpoint"));
    }

    let watch_folder = Utf8PathBuf::from(&config.watch_folder);
    if !watch_folder.exists() {
        return Err(ConfigError::WatchFolderMissing(watch_folder));
    }
    if !watch_folder.is_dir() {
        return Err(ConfigError::WatchFolderNotDirectory(watch_folder));
    }

    if config.service.check_interval <= 0.0 || !config.service.check_interval.is_finite() {
        return Err(ConfigError::Invalid(
            "service.check_interval must be positive".to_string(),
        ));
    }
    if config.api.timeout == 0 {
        return Err(ConfigError::Invalid("api.timeout must be positive".to_string()));
    }
    if config.api.retry_attempts == 0 {
        return Err(ConfigError::Invalid(
            "api.retry_attempts must be at least 1".to_string(),
        ));
    }
    if config.service.max_concurrent_uploads == 0 {
        return Err(ConfigError::Invalid(
            "service.max_concurrent_uploads must be at least 1".to_string(),
        ));
    }

    if config.processing.patterns.is_empty() {
        return Err(ConfigError::Invalid(
            "processing.patterns must not be empty".to_string(),
        ));
    }
    for pattern in &config.processing.patterns {
        glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.msg.to_string(),
        })?;
    }

    match config.api.auth.kind {
        AuthKind::None => {}
        AuthKind::Bearer => {
            if config.api.auth.token.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Invalid(
                    "api.auth.token is required for bearer authentication".to_string(),
                ));
            }
        }
        AuthKind::Basic => {
            let has_username = config.api.auth.username.as_deref().is_some_and(|u| !u.is_empty());
            let has_password = config.api.auth.password.as_deref().is_some_and(|p| !p.is_empty());
            if !has_username || !has_password {
                return Err(ConfigError::Invalid(
                    "api.auth.username and api.auth.password are required for basic authentication"
                        .to_string(),
                ));
            }
        }
    }

    Ok(())
}
