use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Values given on the command line; each one that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub instance: Option<String>,
    pub db_type: Option<DbType>,
    pub log_file: Option<String>,
    pub num_lines: Option<u64>,
    pub output: Option<OutputTarget>,
    pub download_dir: Option<PathBuf>,
    pub formatter: bool,
    pub scrub_query: bool,
    pub tracker: bool,
    pub backoff: Option<Duration>,
    pub api_url: Option<String>,
    pub debug: bool,
}

/// Load a YAML config file. `$env{VAR}` references are expanded first.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&raw).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(&yaml)?)
}

/// Resolve the final config: file (if any), then command-line overrides,
/// then path expansion and validation.
pub fn build_config(file: Option<&Path>, overrides: &Overrides) -> Result<Config, ConfigError> {
    let mut config = match file {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    apply_overrides(&mut config, overrides);
    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(instance) = &overrides.instance {
        config.instance = Some(instance.clone());
    }
    if let Some(db_type) = overrides.db_type {
        config.db_type = db_type;
    }
    if let Some(log_file) = &overrides.log_file {
        config.log_file = Some(log_file.clone());
    }
    if let Some(num_lines) = overrides.num_lines {
        config.num_lines = num_lines;
    }
    if let Some(output) = overrides.output {
        config.output = output;
    }
    if let Some(dir) = &overrides.download_dir {
        config.download_dir = dir.clone();
    }
    if let Some(backoff) = overrides.backoff {
        config.timing.rate_limit_backoff = backoff;
    }
    if let Some(url) = &overrides.api_url {
        config.api.base_url = url.clone();
    }
    if overrides.formatter {
        config.formatter = true;
    }
    if overrides.scrub_query {
        config.scrub_query = true;
    }
    if overrides.tracker && config.cursor_store.kind == CursorStoreKind::None {
        config.cursor_store.kind = CursorStoreKind::File;
    }
    if overrides.debug {
        config.log_level = "debug".to_string();
    }
}

fn expand_paths(config: &mut Config) {
    config.download_dir = expand_tilde(&config.download_dir);
    config.cursor_store.dir = expand_tilde(&config.cursor_store.dir);
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.num_lines == 0 {
        errors.push("num_lines must be greater than 0".to_string());
    }
    if config.rotation.binary_skip_bytes == 0 {
        errors.push("rotation.binary_skip_bytes must be greater than 0".to_string());
    }
    if config.rotation.settle_minutes >= 60 {
        errors.push(format!(
            "rotation.settle_minutes must be below 60, got {}",
            config.rotation.settle_minutes
        ));
    }
    if config.api.base_url.trim().is_empty() {
        errors.push("api.base_url must not be empty".to_string());
    }
    if config.log_file_prefix().is_empty() {
        errors.push("log_file must not be empty".to_string());
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Validation(errors.remove(0))),
        _ => Err(ConfigError::ValidationList(errors)),
    }
}

/// The default config as YAML, for `--write-default-config`.
pub fn default_config_yaml() -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(&Config::default())?)
}
