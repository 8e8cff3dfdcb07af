//! Remote configuration watcher for hot reload.
//!
//! # States
//! ```text
//! Idle ──(jittered timer)──▶ Resolving ──(cycle done)──▶ Idle
//! ```
//!
//! Each cycle resolves a fresh snapshot, diffs it against the stored one and,
//! when something changed, applies the changed fields and sends their names
//! on the notification channel.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::registry::{Configurable, Envs};
use crate::config::service::ConfigState;
use crate::observability::metrics;
use crate::remote::{ResolveError, Resolver, StoreError};

/// Errors that end the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A secret that resolved in the previous cycle can no longer be fetched.
    #[error("secret for \"{field}\" disappeared: {source}")]
    SecretVanished {
        field: String,
        #[source]
        source: StoreError,
    },

    /// The secret store token expired without renewal.
    #[error("secret store token lost: {0}")]
    TokenLost(#[source] StoreError),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Polling interval bounds.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(150),
            max_interval: Duration::from_secs(250),
        }
    }
}

impl WatchSettings {
    /// Delay before the next cycle, uniform in `[min, max)`.
    pub fn next_delay(&self) -> Duration {
        let min = self.min_interval.as_millis() as u64;
        let max = self.max_interval.as_millis() as u64;
        if max <= min {
            return self.min_interval;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }
}

/// Names of fields whose effective value is present in `next` and encodes
/// differently from `previous`. Sorted by name.
pub fn changed_fields(previous: &Envs, next: &Envs) -> Vec<String> {
    next.iter()
        .filter_map(|(name, field)| {
            let new = field.effective_value()?;
            match previous.effective_value(name) {
                Some(old) if old.encode() == new.encode() => None,
                _ => Some(name.clone()),
            }
        })
        .collect()
}

/// Names of fields that had a value in `previous` and have none in `next`.
pub fn removed_overrides(previous: &Envs, next: &Envs) -> Vec<String> {
    previous
        .iter()
        .filter(|(name, field)| {
            field.effective_value().is_some() && next.effective_value(name).is_none()
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Background task keeping a `ConfigState` in sync with the remote stores.
pub struct ConfigWatcher<C: Configurable> {
    resolver: Resolver,
    registry: Envs,
    state: Arc<ConfigState<C>>,
    settings: WatchSettings,
    update_tx: mpsc::Sender<Vec<String>>,
}

impl<C: Configurable> ConfigWatcher<C> {
    pub fn new(
        resolver: Resolver,
        registry: Envs,
        state: Arc<ConfigState<C>>,
        settings: WatchSettings,
        update_tx: mpsc::Sender<Vec<String>>,
    ) -> Self {
        Self {
            resolver,
            registry,
            state,
            settings,
            update_tx,
        }
    }

    /// Run until shutdown, the receiver is dropped, or a fatal error.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), WatchError> {
        tracing::info!(
            min_secs = self.settings.min_interval.as_secs(),
            max_secs = self.settings.max_interval.as_secs(),
            "Config watcher started"
        );

        loop {
            let delay = self.settings.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }

            let changed = tokio::select! {
                result = self.tick() => result?,
                _ = shutdown.recv() => break,
            };

            let Some(changed) = changed else {
                continue;
            };

            // Capacity 1: a consumer still handling the previous batch holds
            // the next cycle back here.
            tokio::select! {
                sent = self.update_tx.send(changed) => {
                    if sent.is_err() {
                        tracing::info!("Config change receiver dropped, watcher exiting");
                        return Ok(());
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Config watcher received shutdown signal, exiting loop");
        Ok(())
    }

    /// One resolution cycle. Returns the applied change set, if any.
    pub async fn tick(&self) -> Result<Option<Vec<String>>, WatchError> {
        let next = match self.resolver.resolve(&self.registry).await {
            Ok(envs) => envs,
            Err(ResolveError::SecretFetchFailed { field, source }) if self.state.had_secret(&field) => {
                metrics::record_cycle("fatal");
                return Err(WatchError::SecretVanished { field, source });
            }
            Err(e) => {
                tracing::error!(error = %e, "Remote config resolution failed. Keeping current configuration.");
                metrics::record_cycle("failed");
                return Ok(None);
            }
        };

        let previous = self.state.snapshot();

        for name in removed_overrides(&previous, &next) {
            tracing::warn!(field = %name, "Remote override removed; keeping last applied value");
        }

        let changed = changed_fields(&previous, &next);
        if changed.is_empty() {
            metrics::record_cycle("unchanged");
            return Ok(None);
        }

        if let Err(e) = self.state.apply(next, &changed) {
            tracing::error!(error = %e, "Failed to apply remote config. Keeping current configuration.");
            metrics::record_apply_failure();
            metrics::record_cycle("failed");
            return Ok(None);
        }

        metrics::record_cycle("changed");
        metrics::record_changed_fields(changed.len());
        tracing::info!(changed = ?changed, "Main config was updated");

        Ok(Some(changed))
    }
}
