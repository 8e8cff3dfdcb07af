//! In-memory stores for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::remote::{KvStore, Namespace, SecretStore, ServiceAddress, StoreError};

#[derive(Default)]
struct KvState {
    values: HashMap<(Namespace, String), Vec<u8>>,
    services: HashMap<String, Vec<ServiceAddress>>,
    failing: bool,
    fetches: usize,
}

/// A `KvStore` backed by hash maps.
#[derive(Default)]
pub struct MemoryKvStore {
    state: Mutex<KvState>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, KvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, namespace: Namespace, key: &str, value: impl Into<Vec<u8>>) {
        self.state()
            .values
            .insert((namespace, key.to_string()), value.into());
    }

    pub fn remove(&self, namespace: Namespace, key: &str) {
        self.state().values.remove(&(namespace, key.to_string()));
    }

    /// Registers the endpoints returned for `service`, duplicates included.
    pub fn register_service(&self, service: &str, endpoints: Vec<ServiceAddress>) {
        self.state().services.insert(service.to_string(), endpoints);
    }

    /// Makes every subsequent fetch fail with a transport-style error.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Number of `fetch_value` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn fetch_value(&self, namespace: Namespace, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut state = self.state();
        state.fetches += 1;
        if state.failing {
            return Err(StoreError::Status {
                status: 500,
                url: format!("memory://{:?}/{}", namespace, key),
            });
        }

        state
            .values
            .get(&(namespace, key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn fetch_service_endpoints(&self, service: &str) -> Result<Vec<ServiceAddress>, StoreError> {
        let state = self.state();
        if state.failing {
            return Err(StoreError::Status {
                status: 500,
                url: format!("memory://services/{}", service),
            });
        }
        Ok(state.services.get(service).cloned().unwrap_or_default())
    }
}

/// A `SecretStore` backed by a hash map.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn secrets(&self) -> MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, path: &str, value: impl Into<serde_json::Value>) {
        self.secrets().insert(path.to_string(), value.into());
    }

    pub fn remove(&self, path: &str) {
        self.secrets().remove(path);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn fetch_secret(&self, path: &str) -> Result<serde_json::Value, StoreError> {
        self.secrets()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::MissingSecretValue(path.to_string()))
    }
}
