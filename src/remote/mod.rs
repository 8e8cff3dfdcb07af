//! Remote configuration sources.
//!
//! # Data Flow
//! ```text
//! Envs (registry, no values)
//!     → resolver.rs walks every field
//!         → KvStore::fetch_value        (Consul KV, per namespace)
//!         → KvStore::fetch_service_endpoints (Consul health, discovery links)
//!         → SecretStore::fetch_secret   (Vault KV v2, secret fields)
//!     → Envs (fully resolved snapshot)
//! ```
//!
//! # Design Decisions
//! - Stores are consumed through narrow async traits so the resolver never
//!   depends on a concrete HTTP client
//! - "Key not found" is a distinguished error value, not an `Option`, so the
//!   resolver decides what absence means
//! - Clients are optional: a service without both stores runs local-only

pub mod consul;
pub mod memory;
pub mod resolver;
pub mod vault;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use resolver::{ResolveError, Resolver};

/// A network endpoint returned by service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Removes repeated endpoints, keeping the first occurrence of each
/// `(address, port)` pair.
///
/// Quadratic, which is fine for the handful of instances a service runs.
pub fn dedup_addresses(addrs: impl IntoIterator<Item = ServiceAddress>) -> Vec<ServiceAddress> {
    let mut unique: Vec<ServiceAddress> = Vec::new();
    for addr in addrs {
        if !unique.contains(&addr) {
            unique.push(addr);
        }
    }
    unique
}

/// Key namespace inside the distributed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Shared by every service on the stand.
    Global,
    /// Scoped to the running service.
    Service,
}

/// Errors reported by store clients.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no value. Callers treat this as "no override".
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an unexpected status.
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The secret store token can no longer be used.
    #[error("token error: {0}")]
    Token(String),

    /// The secret exists but carries no `value` entry.
    #[error("field \"value\" does not exist in secret path \"{0}\"")]
    MissingSecretValue(String),
}

impl StoreError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }
}

/// Distributed key/value store with service discovery.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the raw bytes stored under `key` in `namespace`.
    async fn fetch_value(&self, namespace: Namespace, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Fetch the healthy endpoints currently registered for `service`.
    async fn fetch_service_endpoints(&self, service: &str) -> Result<Vec<ServiceAddress>, StoreError>;
}

/// Secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret stored at `path`.
    async fn fetch_secret(&self, path: &str) -> Result<serde_json::Value, StoreError>;
}

/// The pair of remote clients a service resolves against.
///
/// Both must be present for remote resolution; otherwise the service runs
/// from local configuration only.
#[derive(Clone, Default)]
pub struct RemoteStores {
    pub kv: Option<Arc<dyn KvStore>>,
    pub secrets: Option<Arc<dyn SecretStore>>,
}

impl RemoteStores {
    pub fn new(kv: Arc<dyn KvStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            kv: Some(kv),
            secrets: Some(secrets),
        }
    }

    /// No remote stores configured.
    pub fn local_only() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.kv.is_some() && self.secrets.is_some()
    }
}

impl fmt::Debug for RemoteStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStores")
            .field("kv", &self.kv.is_some())
            .field("secrets", &self.secrets.is_some())
            .finish()
    }
}
