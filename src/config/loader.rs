//! Configuration loading from the process environment.
//!
//! Variables come from the process environment, optionally seeded from a
//! `.env` file. Each variable named after a registry field is applied
//! through the same setters the remote resolver uses.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::mutator::set_field;
use crate::config::registry::{build_registry, Configurable, FieldError};
use crate::config::validation::ValidationError;
use crate::config::value::RawValue;
use crate::remote::{ResolveError, StoreError};

/// Error type for configuration loading and startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },

    #[error("failed to set config env \"{name}\": {source}")]
    Field {
        name: String,
        #[source]
        source: FieldError,
    },

    #[error("invalid field registry: {0}")]
    Registry(#[source] FieldError),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to init remote client: {0}")]
    Client(#[from] StoreError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Options for a load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Directory holding the `.env` file; defaults to the working directory.
    pub env_path: Option<PathBuf>,
    /// Run `Configurable::validate` after loading.
    pub validate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            env_path: None,
            validate: true,
        }
    }
}

impl LoadOptions {
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn with_env_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_path = Some(path.into());
        self
    }
}

/// Loads `.env` into the process environment. A missing file is ignored;
/// variables already set keep their value.
pub fn load_env_file(dir: Option<&Path>) -> Result<(), ConfigError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().map_err(|e| ConfigError::EnvFile {
            path: PathBuf::from("."),
            source: dotenv::Error::Io(e),
        })?,
    };
    let path = dir.join(".env");

    match dotenv::from_path(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Loaded env file");
            Ok(())
        }
        Err(dotenv::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ConfigError::EnvFile { path, source }),
    }
}

/// Fills `config` from the process environment (and `.env`).
pub fn load_from_env<C: Configurable>(config: &mut C, options: &LoadOptions) -> Result<(), ConfigError> {
    load_env_file(options.env_path.as_deref())?;
    load_from_lookup(config, options.validate, |name| env::var(name).ok())
}

/// Fills `config` from `lookup`, one call per registry field.
pub fn load_from_lookup<C, F>(config: &mut C, validate: bool, lookup: F) -> Result<(), ConfigError>
where
    C: Configurable,
    F: Fn(&str) -> Option<String>,
{
    let envs = build_registry(config).map_err(ConfigError::Registry)?;

    for name in envs.names() {
        let Some(value) = lookup(name).filter(|v| !v.is_empty()) else {
            continue;
        };

        set_field(config, &envs, name, RawValue::Str(value)).map_err(|source| ConfigError::Field {
            name: name.to_string(),
            source,
        })?;
    }

    if validate {
        config.validate().map_err(ConfigError::Validation)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AppConfig, BootstrapConfig};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_applies_matching_variables() {
        let mut cfg = AppConfig::default();
        let vars = lookup(&[
            ("SERVICE_NAME", "limiter"),
            ("PROMETHEUS_PORT", "9100"),
            ("RABBIT_IS_SECURE", "1"),
            ("GPG_PUBLIC_SIGNATURES", r#"{"ops":"KEY"}"#),
            ("UNRELATED", "x"),
        ]);

        load_from_lookup(&mut cfg, false, vars).unwrap();

        assert_eq!(cfg.local.service_name, "limiter");
        assert_eq!(cfg.local.prometheus.port, 9100);
        assert!(cfg.local.rabbit.is_secure);
        assert_eq!(cfg.local.gpg_public_signatures.len(), 1);
    }

    #[test]
    fn test_empty_variables_keep_defaults() {
        let mut cfg = AppConfig::default();
        load_from_lookup(&mut cfg, false, lookup(&[("SERVICE_NAME", "")])).unwrap();
        assert_eq!(cfg.local.service_name, "rate-limit");
    }

    #[test]
    fn test_bad_variable_names_field() {
        let mut cfg = AppConfig::default();
        let err = load_from_lookup(&mut cfg, false, lookup(&[("REDIS_DB_INDEX", "two")])).unwrap_err();

        match err {
            ConfigError::Field { name, source } => {
                assert_eq!(name, "REDIS_DB_INDEX");
                assert!(matches!(source, FieldError::TypeMismatch { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_validation_runs_when_requested() {
        let mut boot = BootstrapConfig::default();
        let err = load_from_lookup(&mut boot, true, lookup(&[("CONSUL_ENABLED", "false")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 3));

        let mut boot = BootstrapConfig::default();
        let vars = lookup(&[("CONSUL_ENABLED", "false"), ("VAULT_ENABLED", "false")]);
        load_from_lookup(&mut boot, true, vars).unwrap();
        assert!(!boot.remote_enabled());
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = std::env::temp_dir().join("layered-config-no-such-dir");
        assert!(load_env_file(Some(&dir)).is_ok());
    }
}
