//! Configuration schema definitions.
//!
//! This module defines the service configuration and the bootstrap settings
//! used to reach the remote stores. Each structure carries a descriptor
//! table naming its overridable fields.

use std::collections::BTreeMap;

use rand::Rng;

use crate::config::registry::{Configurable, FieldSpec};
use crate::config::validation::{self, ValidationError};
use crate::field;
use crate::remote::ServiceAddress;

/// Stand name used on developer machines.
pub const LOCAL_STAND: &str = "local";

/// Root configuration of the service.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Endpoints filled from service discovery.
    pub discovery: DiscoveryConfig,

    /// Settings shared by every service on the stand.
    pub global: GlobalConfig,

    /// Settings owned by this service.
    pub local: LocalConfig,
}

/// Endpoints resolved through service discovery.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    pub postgres_addrs: Vec<ServiceAddress>,
    pub rabbit_addrs: Vec<ServiceAddress>,
    pub redis_addrs: Vec<ServiceAddress>,
}

/// Stand-wide settings.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Log filter directive (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Service-scoped settings.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub service_name: String,
    pub stand_name: String,
    pub rabbit: RabbitConfig,
    pub prometheus: PrometheusConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub health_check: HealthCheckConfig,
    pub gpg_public_signatures: BTreeMap<String, String>,

    /// Service names looked up in discovery; results land in `DiscoveryConfig`.
    pub discovery_postgres_service: String,
    pub discovery_rabbit_service: String,
    pub discovery_redis_service: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            service_name: "rate-limit".to_string(),
            stand_name: String::new(),
            rabbit: RabbitConfig::default(),
            prometheus: PrometheusConfig::default(),
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            health_check: HealthCheckConfig::default(),
            gpg_public_signatures: BTreeMap::new(),
            discovery_postgres_service: String::new(),
            discovery_rabbit_service: String::new(),
            discovery_redis_service: String::new(),
        }
    }
}

/// Message bus credentials.
#[derive(Debug, Clone, Default)]
pub struct RabbitConfig {
    pub user: String,
    pub pass: String,
    pub is_secure: bool,
    /// Static address for local development.
    pub addr: String,
}

/// Metrics endpoint settings.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub port: u16,
    pub endpoint: String,
    pub disabled: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 10001,
            endpoint: "/metrics".to_string(),
            disabled: false,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub addr: String,
    pub user: String,
    pub pass: String,
    pub db: String,
    pub max_conns: i32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            user: String::new(),
            pass: String::new(),
            db: String::new(),
            max_conns: 10,
        }
    }
}

/// Cache connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub user: String,
    pub pass: String,
    pub db_index: i64,
    /// Seconds between liveness pings.
    pub ping_interval: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            user: String::new(),
            pass: String::new(),
            db_index: 0,
            ping_interval: 10,
        }
    }
}

/// Health check endpoint settings.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub port: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { port: 10000 }
    }
}

static APP_FIELDS: &[FieldSpec<AppConfig>] = &[
    field!(AppConfig, "SERVICE_NAME", local.service_name),
    field!(AppConfig, "CONSUL_STAND_NAME", local.stand_name),
    field!(AppConfig, "LOG_LEVEL", global.log_level).global(),
    // Rabbit
    field!(AppConfig, "RABBIT_USER", local.rabbit.user).secret(),
    field!(AppConfig, "RABBIT_PASS", local.rabbit.pass).secret(),
    field!(AppConfig, "RABBIT_IS_SECURE", local.rabbit.is_secure),
    field!(AppConfig, "RABBIT_ADDR", local.rabbit.addr),
    // Prometheus
    field!(AppConfig, "PROMETHEUS_PORT", local.prometheus.port),
    field!(AppConfig, "PROMETHEUS_ENDPOINT", local.prometheus.endpoint),
    field!(AppConfig, "PROMETHEUS_DISABLED", local.prometheus.disabled),
    // Postgres
    field!(AppConfig, "POSTGRES_ADDR", local.postgres.addr),
    field!(AppConfig, "POSTGRES_USER", local.postgres.user).secret(),
    field!(AppConfig, "POSTGRES_PASS", local.postgres.pass).secret(),
    field!(AppConfig, "POSTGRES_DB", local.postgres.db),
    field!(AppConfig, "POSTGRES_MAX_CONNS", local.postgres.max_conns),
    // Redis
    field!(AppConfig, "REDIS_ADDR", local.redis.addr),
    field!(AppConfig, "REDIS_USER", local.redis.user).secret(),
    field!(AppConfig, "REDIS_PASS", local.redis.pass).secret(),
    field!(AppConfig, "REDIS_DB_INDEX", local.redis.db_index),
    field!(AppConfig, "REDIS_PING_INTERVAL", local.redis.ping_interval),
    field!(AppConfig, "HEALTH_CHECK_PORT", local.health_check.port),
    field!(AppConfig, "GPG_PUBLIC_SIGNATURES", local.gpg_public_signatures),
    // Discovery
    field!(AppConfig, "DISCOVERY_POSTGRES_SERVICE", local.discovery_postgres_service)
        .discovers("POSTGRES_ADDRS"),
    field!(AppConfig, "DISCOVERY_RABBIT_SERVICE", local.discovery_rabbit_service)
        .discovers("RABBIT_ADDRS"),
    field!(AppConfig, "DISCOVERY_REDIS_SERVICE", local.discovery_redis_service)
        .discovers("REDIS_ADDRS"),
    field!(AppConfig, "POSTGRES_ADDRS", discovery.postgres_addrs).discovery(),
    field!(AppConfig, "RABBIT_ADDRS", discovery.rabbit_addrs).discovery(),
    field!(AppConfig, "REDIS_ADDRS", discovery.redis_addrs).discovery(),
];

impl Configurable for AppConfig {
    fn fields() -> &'static [FieldSpec<Self>] {
        APP_FIELDS
    }

    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validation::validate_app_config(self)
    }

    fn service_name(&self) -> &str {
        &self.local.service_name
    }

    fn stand_name(&self) -> &str {
        &self.local.stand_name
    }
}

impl AppConfig {
    pub fn is_local_stand(&self) -> bool {
        self.local.stand_name == LOCAL_STAND
    }

    /// Random discovered rabbit endpoint, or `RABBIT_ADDR` when discovery is empty.
    pub fn rabbit_addr(&self) -> String {
        pick_addr(&self.discovery.rabbit_addrs, &self.local.rabbit.addr)
    }

    /// Random discovered postgres endpoint, or `POSTGRES_ADDR` when discovery is empty.
    pub fn postgres_addr(&self) -> String {
        pick_addr(&self.discovery.postgres_addrs, &self.local.postgres.addr)
    }

    /// Random discovered redis endpoint, or `REDIS_ADDR` when discovery is empty.
    pub fn redis_addr(&self) -> String {
        pick_addr(&self.discovery.redis_addrs, &self.local.redis.addr)
    }
}

#[cfg(test)]
impl AppConfig {
    /// A configuration that passes validation on the local stand.
    pub(crate) fn valid_local() -> Self {
        let mut cfg = Self::default();
        cfg.local.stand_name = LOCAL_STAND.to_string();
        cfg.local.rabbit.user = "guest".to_string();
        cfg.local.rabbit.pass = "guest".to_string();
        cfg.local.postgres.user = "pg".to_string();
        cfg.local.postgres.pass = "pg".to_string();
        cfg.local.postgres.db = "limits".to_string();
        cfg
    }
}

fn pick_addr(discovered: &[ServiceAddress], fallback: &str) -> String {
    if discovered.is_empty() {
        return fallback.to_string();
    }
    let idx = rand::thread_rng().gen_range(0..discovered.len());
    discovered[idx].to_string()
}

/// Settings needed before the remote stores can be reached.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub vault_enabled: bool,
    pub vault_url: String,
    pub vault_token: String,
    pub vault_mount_path: String,

    pub consul_enabled: bool,
    pub consul_url: String,
    pub consul_token: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            vault_enabled: true,
            vault_url: String::new(),
            vault_token: String::new(),
            vault_mount_path: String::new(),
            consul_enabled: true,
            consul_url: String::new(),
            consul_token: String::new(),
        }
    }
}

impl BootstrapConfig {
    /// Remote resolution needs both stores.
    pub fn remote_enabled(&self) -> bool {
        self.consul_enabled && self.vault_enabled
    }
}

static BOOTSTRAP_FIELDS: &[FieldSpec<BootstrapConfig>] = &[
    field!(BootstrapConfig, "VAULT_ENABLED", vault_enabled),
    field!(BootstrapConfig, "VAULT_GENERAL_URL", vault_url),
    field!(BootstrapConfig, "VAULT_GENERAL_TOKEN", vault_token),
    field!(BootstrapConfig, "VAULT_MOUNT_PATH", vault_mount_path),
    field!(BootstrapConfig, "CONSUL_ENABLED", consul_enabled),
    field!(BootstrapConfig, "CONSUL_GENERAL_URL", consul_url),
    field!(BootstrapConfig, "CONSUL_GENERAL_TOKEN", consul_token),
];

impl Configurable for BootstrapConfig {
    fn fields() -> &'static [FieldSpec<Self>] {
        BOOTSTRAP_FIELDS
    }

    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validation::validate_bootstrap_config(self)
    }

    fn service_name(&self) -> &str {
        ""
    }

    fn stand_name(&self) -> &str {
        ""
    }
}
