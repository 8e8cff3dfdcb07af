//! Layered configuration resolution and hot reload for services.
//!
//! Local environment first, then remote overrides from Consul, service
//! discovery and Vault secrets, then a background watcher that keeps the
//! live configuration in sync.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod remote;

pub use config::{AppConfig, ConfigService};
pub use lifecycle::Shutdown;
