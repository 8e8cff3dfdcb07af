//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! .env + process environment
//!     → loader.rs (BootstrapConfig, then AppConfig, via the field setters)
//!     → registry.rs (Envs: one descriptor per overridable field)
//!     → remote::Resolver (Consul overrides, discovery, Vault secrets)
//!     → mutator.rs (apply effective values by name, value.rs coerces)
//!     → validation.rs (semantic checks, all failures at once)
//!     → service.rs (ConfigState: Arc<AppConfig> snapshot + current Envs)
//!
//! Every 150-250s:
//!     watcher.rs resolves again
//!     → diff against the stored Envs
//!     → apply changed fields to a copy, swap it in
//!     → send the changed names on the notification channel
//! ```
//!
//! # Design Decisions
//! - Fields are found through hand-written descriptor tables, not reflection
//! - Readers hold an immutable snapshot; updates replace it atomically
//! - Unknown and empty values are rejected before a setter ever runs

pub mod loader;
pub mod mutator;
pub mod registry;
pub mod schema;
pub mod service;
pub mod validation;
pub mod value;
pub mod watcher;

pub use loader::{ConfigError, LoadOptions};
pub use registry::{build_registry, Classification, Configurable, Envs, FieldDescriptor, FieldError, FieldSpec};
pub use schema::{AppConfig, BootstrapConfig};
pub use service::{ConfigService, ConfigState};
pub use value::RawValue;
pub use watcher::{WatchError, WatchSettings};
