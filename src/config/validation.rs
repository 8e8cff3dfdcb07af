//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (coercion handles types)
//! - Required fields, value ranges, stand-dependent requirements
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: config → Result<(), Vec<ValidationError>>
//! - Runs on local config at startup and again after remote values are merged

use std::fmt;

use crate::config::schema::{AppConfig, BootstrapConfig};

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Default)]
struct Checker {
    errors: Vec<ValidationError>,
}

impl Checker {
    fn required(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.errors.push(ValidationError::new(field, "cannot be blank"));
        }
    }

    fn required_list<T>(&mut self, field: &'static str, value: &[T]) {
        if value.is_empty() {
            self.errors.push(ValidationError::new(field, "cannot be empty"));
        }
    }

    fn positive(&mut self, field: &'static str, value: i64) {
        if value <= 0 {
            self.errors
                .push(ValidationError::new(field, format!("must be positive, got {}", value)));
        }
    }

    fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

pub fn validate_app_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut check = Checker::default();
    let local = &config.local;

    check.required("SERVICE_NAME", &local.service_name);
    check.required("CONSUL_STAND_NAME", &local.stand_name);

    check.required("RABBIT_USER", &local.rabbit.user);
    check.required("RABBIT_PASS", &local.rabbit.pass);

    check.required("POSTGRES_USER", &local.postgres.user);
    check.required("POSTGRES_PASS", &local.postgres.pass);
    check.required("POSTGRES_DB", &local.postgres.db);
    check.positive("POSTGRES_MAX_CONNS", i64::from(local.postgres.max_conns));

    check.positive("REDIS_PING_INTERVAL", local.redis.ping_interval);

    if !local.prometheus.disabled {
        check.positive("PROMETHEUS_PORT", i64::from(local.prometheus.port));
        check.required("PROMETHEUS_ENDPOINT", &local.prometheus.endpoint);
    }

    // Discovery is optional on developer machines.
    if !config.is_local_stand() {
        check.required("DISCOVERY_POSTGRES_SERVICE", &local.discovery_postgres_service);
        check.required("DISCOVERY_RABBIT_SERVICE", &local.discovery_rabbit_service);
        check.required("DISCOVERY_REDIS_SERVICE", &local.discovery_redis_service);

        check.required_list("POSTGRES_ADDRS", &config.discovery.postgres_addrs);
        check.required_list("RABBIT_ADDRS", &config.discovery.rabbit_addrs);
        check.required_list("REDIS_ADDRS", &config.discovery.redis_addrs);
    }

    check.finish()
}

pub fn validate_bootstrap_config(config: &BootstrapConfig) -> Result<(), Vec<ValidationError>> {
    let mut check = Checker::default();

    if config.consul_enabled {
        check.required("CONSUL_GENERAL_URL", &config.consul_url);
    }

    if config.vault_enabled {
        check.required("VAULT_GENERAL_URL", &config.vault_url);
        check.required("VAULT_GENERAL_TOKEN", &config.vault_token);
        check.required("VAULT_MOUNT_PATH", &config.vault_mount_path);
    }

    check.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ServiceAddress;

    fn valid_local_config() -> AppConfig {
        AppConfig::valid_local()
    }

    #[test]
    fn test_valid_local_config() {
        assert!(validate_app_config(&valid_local_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = validate_app_config(&AppConfig::default()).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();

        assert!(fields.contains(&"CONSUL_STAND_NAME"));
        assert!(fields.contains(&"RABBIT_USER"));
        assert!(fields.contains(&"POSTGRES_DB"));
        assert!(errors.len() > 3);
    }

    #[test]
    fn test_remote_stand_requires_discovery() {
        let mut cfg = valid_local_config();
        cfg.local.stand_name = "prod".to_string();

        let errors = validate_app_config(&cfg).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "DISCOVERY_REDIS_SERVICE"));
        assert!(errors.iter().any(|e| e.field == "REDIS_ADDRS"));

        cfg.local.discovery_postgres_service = "postgres".to_string();
        cfg.local.discovery_rabbit_service = "rabbit".to_string();
        cfg.local.discovery_redis_service = "redis".to_string();
        cfg.discovery.postgres_addrs = vec![ServiceAddress::new("pg", 5432)];
        cfg.discovery.rabbit_addrs = vec![ServiceAddress::new("mq", 5672)];
        cfg.discovery.redis_addrs = vec![ServiceAddress::new("redis", 6379)];
        assert!(validate_app_config(&cfg).is_ok());
    }

    #[test]
    fn test_disabled_prometheus_skips_port_check() {
        let mut cfg = valid_local_config();
        cfg.local.prometheus.port = 0;
        assert!(validate_app_config(&cfg).is_err());

        cfg.local.prometheus.disabled = true;
        assert!(validate_app_config(&cfg).is_ok());
    }

    #[test]
    fn test_bootstrap_requirements() {
        let boot = BootstrapConfig::default();
        let errors = validate_bootstrap_config(&boot).unwrap_err();
        assert_eq!(errors.len(), 4);

        let boot = BootstrapConfig {
            consul_enabled: false,
            vault_enabled: false,
            ..BootstrapConfig::default()
        };
        assert!(validate_bootstrap_config(&boot).is_ok());
    }
}
