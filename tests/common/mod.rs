//! Shared fixtures for config service integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use layered_config::config::{AppConfig, ConfigService, WatchSettings};
use layered_config::lifecycle::Shutdown;
use layered_config::remote::memory::{MemoryKvStore, MemorySecretStore};
use layered_config::remote::RemoteStores;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// A locally valid configuration on the `local` stand.
pub fn local_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.local.stand_name = "local".to_string();
    cfg.local.rabbit.user = "guest".to_string();
    cfg.local.rabbit.pass = "guest".to_string();
    cfg.local.postgres.user = "pg".to_string();
    cfg.local.postgres.pass = "pg".to_string();
    cfg.local.postgres.db = "limits".to_string();
    cfg
}

/// Watch cycles every few milliseconds.
pub fn fast_settings() -> WatchSettings {
    WatchSettings {
        min_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(10),
    }
}

/// In-memory Consul and Vault stand-ins.
pub struct Stores {
    pub kv: Arc<MemoryKvStore>,
    pub secrets: Arc<MemorySecretStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            secrets: Arc::new(MemorySecretStore::new()),
        }
    }

    pub fn remote(&self) -> RemoteStores {
        RemoteStores::new(self.kv.clone(), self.secrets.clone())
    }
}

pub struct Harness {
    pub stores: Stores,
    pub service: ConfigService<AppConfig>,
    pub changes: mpsc::Receiver<Vec<String>>,
    pub shutdown: Shutdown,
}

/// Starts a service over `stores` with fast watch settings.
pub async fn start(stores: Stores, config: AppConfig) -> Harness {
    let shutdown = Shutdown::new();
    let (service, changes) = ConfigService::start(config, stores.remote(), fast_settings(), &shutdown)
        .await
        .expect("service should start");

    Harness {
        stores,
        service,
        changes,
        shutdown,
    }
}

/// Next change batch, or `None` if nothing arrives within `within`.
pub async fn next_change(changes: &mut mpsc::Receiver<Vec<String>>, within: Duration) -> Option<Vec<String>> {
    tokio::time::timeout(within, changes.recv()).await.ok().flatten()
}

/// Polls `check` until it holds or `WAIT` elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    check()
}
