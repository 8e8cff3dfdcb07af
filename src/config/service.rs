//! Config service: startup orchestration and the live configuration state.
//!
//! # Responsibilities
//! - Load local configuration, resolve remote overrides once, validate
//! - Hold the live configuration and the current remote snapshot
//! - Start the watcher and hand its notification channel to the application
//!
//! # Design Decisions
//! - Fail fast: a service never starts with a partially resolved config
//! - Readers get an `Arc<C>` snapshot; the watcher swaps in a new one
//! - The snapshot lock is never held across network I/O
//! - Without both remote stores the service runs local-only: no watcher, and
//!   the change channel stays open but silent

use std::future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::loader::{load_env_file, load_from_env, ConfigError, LoadOptions};
use crate::config::mutator::set_field;
use crate::config::registry::{build_registry, Configurable, Envs};
use crate::config::schema::{AppConfig, BootstrapConfig};
use crate::config::watcher::{ConfigWatcher, WatchError, WatchSettings};
use crate::lifecycle::Shutdown;
use crate::remote::consul::{ConsulClient, ConsulConfig};
use crate::remote::vault::{VaultClient, VaultConfig};
use crate::remote::{KvStore, RemoteStores, Resolver, SecretStore};

/// Room for one pending batch of changed field names.
const CHANGE_CHANNEL_CAPACITY: usize = 1;

/// Timeout applied to every remote store request.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// The live configuration and the remote snapshot it was built from.
pub struct ConfigState<C> {
    config: ArcSwap<C>,
    envs: RwLock<Envs>,
}

impl<C: Configurable> ConfigState<C> {
    pub fn new(config: C, envs: Envs) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            envs: RwLock::new(envs),
        }
    }

    /// Current configuration.
    pub fn current(&self) -> Arc<C> {
        self.config.load_full()
    }

    /// Copy of the current remote snapshot.
    pub fn snapshot(&self) -> Envs {
        self.envs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether `name` resolved through the secret store in the current snapshot.
    pub fn had_secret(&self, name: &str) -> bool {
        self.envs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|field| field.is_secret && field.external_value.is_some())
    }

    /// Applies `changed` fields from `next` to a copy of the configuration,
    /// then publishes both the copy and `next`.
    ///
    /// Nothing is published if any field fails to apply.
    pub fn apply(&self, next: Envs, changed: &[String]) -> Result<(), ConfigError> {
        let mut envs = self.envs.write().unwrap_or_else(PoisonError::into_inner);

        let mut config = C::clone(&self.config.load());
        apply_fields(&mut config, &next, changed.iter().map(String::as_str))?;

        self.config.store(Arc::new(config));
        *envs = next;
        Ok(())
    }
}

fn apply_fields<'a, C: Configurable>(
    config: &mut C,
    envs: &Envs,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    for name in names {
        let Some(value) = envs.effective_value(name) else {
            continue;
        };

        set_field(config, envs, name, value.clone()).map_err(|source| ConfigError::Field {
            name: name.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Resolves remote overrides once and applies every resolved field to `config`.
pub async fn resolve_once<C: Configurable>(
    config: &mut C,
    registry: &Envs,
    resolver: &Resolver,
) -> Result<Envs, ConfigError> {
    let envs = resolver.resolve(registry).await?;
    apply_fields(config, &envs, envs.names())?;
    Ok(envs)
}

/// Running configuration service.
pub struct ConfigService<C: Configurable> {
    state: Arc<ConfigState<C>>,
    tasks: JoinSet<Result<(), WatchError>>,
    // Keeps the change channel open in local-only mode.
    idle_tx: Option<mpsc::Sender<Vec<String>>>,
}

impl<C: Configurable> ConfigService<C> {
    /// Starts the service from an already locally loaded `config`.
    ///
    /// Returns the service and the channel of changed-field batches.
    pub async fn start(
        mut config: C,
        stores: RemoteStores,
        settings: WatchSettings,
        shutdown: &Shutdown,
    ) -> Result<(Self, mpsc::Receiver<Vec<String>>), ConfigError> {
        let registry = build_registry(&config).map_err(ConfigError::Registry)?;
        let (update_tx, update_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        if !stores.is_enabled() {
            tracing::info!("Remote config stores disabled, running with local config only");
            config.validate().map_err(ConfigError::Validation)?;

            let service = Self {
                state: Arc::new(ConfigState::new(config, registry)),
                tasks: JoinSet::new(),
                idle_tx: Some(update_tx),
            };
            return Ok((service, update_rx));
        }

        let resolver = Resolver::new(stores, config.stand_name());
        let envs = resolve_once(&mut config, &registry, &resolver).await?;
        config.validate().map_err(ConfigError::Validation)?;

        tracing::info!(
            fields = registry.len(),
            overrides = envs.iter().filter(|(_, f)| f.effective_value().is_some()).count(),
            "Remote config resolved"
        );

        let state = Arc::new(ConfigState::new(config, envs));
        let watcher = ConfigWatcher::new(resolver, registry, state.clone(), settings, update_tx);

        let mut tasks = JoinSet::new();
        tasks.spawn(watcher.run(shutdown.subscribe()));

        Ok((
            Self {
                state,
                tasks,
                idle_tx: None,
            },
            update_rx,
        ))
    }

    pub fn current(&self) -> Arc<C> {
        self.state.current()
    }

    pub fn snapshot(&self) -> Envs {
        self.state.snapshot()
    }

    pub fn state(&self) -> Arc<ConfigState<C>> {
        self.state.clone()
    }

    pub fn is_local_only(&self) -> bool {
        self.idle_tx.is_some()
    }

    /// Adds a background task whose failure is fatal to the service.
    pub fn supervise<F>(&mut self, task: F)
    where
        F: future::Future<Output = Result<(), WatchError>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Resolves with the first fatal background error. Never resolves while
    /// every task is healthy or once all tasks ended cleanly.
    pub async fn fatal_error(&mut self) -> WatchError {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => return e,
                Err(e) => return WatchError::Task(e.to_string()),
            }
        }
        future::pending().await
    }
}

impl ConfigService<AppConfig> {
    /// Full startup of the service configuration from the environment.
    pub async fn bootstrap(
        options: &LoadOptions,
        settings: WatchSettings,
        shutdown: &Shutdown,
    ) -> Result<(Self, mpsc::Receiver<Vec<String>>), ConfigError> {
        let (config, stores, vault) = load_local(options)?;

        let (mut service, changes) = Self::start(config, stores, settings, shutdown).await?;

        if let Some(vault) = vault {
            let shutdown_rx = shutdown.subscribe();
            service.supervise(async move {
                vault
                    .run_token_renewal(shutdown_rx)
                    .await
                    .map_err(WatchError::TokenLost)
            });
        }

        Ok((service, changes))
    }
}

/// Loads `AppConfig` from `.env` and the environment, unvalidated.
///
/// Bootstrap settings are not read; no remote client is built.
pub fn load_app_config(options: &LoadOptions) -> Result<AppConfig, ConfigError> {
    // Remote values may still fill required fields.
    let mut config = AppConfig::default();
    load_from_env(&mut config, &options.clone().without_validation())?;
    Ok(config)
}

/// Loads bootstrap and local configuration and builds the enabled clients.
pub fn load_local(
    options: &LoadOptions,
) -> Result<(AppConfig, RemoteStores, Option<Arc<VaultClient>>), ConfigError> {
    load_env_file(options.env_path.as_deref())?;

    let mut bootstrap = BootstrapConfig::default();
    load_from_env(&mut bootstrap, options)?;

    let config = load_app_config(options)?;

    let mut stores = RemoteStores::local_only();
    let mut vault = None;

    if bootstrap.consul_enabled {
        let consul = ConsulClient::new(ConsulConfig {
            address: bootstrap.consul_url.clone(),
            token: bootstrap.consul_token.clone(),
            service_name: config.local.service_name.clone(),
            stand_name: config.local.stand_name.clone(),
            timeout: REMOTE_TIMEOUT,
        })?;
        let kv: Arc<dyn KvStore> = Arc::new(consul);
        stores.kv = Some(kv);
        tracing::info!("Connected to consul");
    }

    if bootstrap.vault_enabled {
        let client = Arc::new(VaultClient::new(VaultConfig {
            address: bootstrap.vault_url.clone(),
            token: bootstrap.vault_token.clone(),
            mount_path: bootstrap.vault_mount_path.clone(),
            timeout: REMOTE_TIMEOUT,
        })?);
        let secrets: Arc<dyn SecretStore> = client.clone();
        stores.secrets = Some(secrets);
        vault = Some(client);
        tracing::info!("Connected to vault");
    }

    Ok((config, stores, vault))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::value::RawValue;
    use crate::remote::memory::{MemoryKvStore, MemorySecretStore};
    use crate::remote::Namespace;

    #[test]
    fn test_apply_is_all_or_nothing() {
        let cfg = AppConfig::valid_local();
        let registry = build_registry(&cfg).unwrap();
        let state = ConfigState::new(cfg, registry.clone());

        let mut next = registry.clone();
        next.set_value("PROMETHEUS_PORT", RawValue::from("9090"));
        next.set_value("REDIS_DB_INDEX", RawValue::from("not-a-number"));

        let changed = vec!["PROMETHEUS_PORT".to_string(), "REDIS_DB_INDEX".to_string()];
        assert!(state.apply(next, &changed).is_err());

        assert_eq!(state.current().local.prometheus.port, 10001);
        assert_eq!(state.snapshot(), registry);
    }

    #[test]
    fn test_apply_swaps_config_and_snapshot() {
        let cfg = AppConfig::valid_local();
        let registry = build_registry(&cfg).unwrap();
        let state = ConfigState::new(cfg, registry.clone());
        let before = state.current();

        let mut next = registry;
        next.set_value("PROMETHEUS_PORT", RawValue::from("9090"));
        state.apply(next.clone(), &["PROMETHEUS_PORT".to_string()]).unwrap();

        assert_eq!(state.current().local.prometheus.port, 9090);
        assert_eq!(state.snapshot(), next);
        // Earlier readers keep their snapshot.
        assert_eq!(before.local.prometheus.port, 10001);
    }

    #[test]
    fn test_app_config_loads_without_bootstrap_settings() {
        let dir = std::env::temp_dir().join("layered-config-no-env-file");
        let options = LoadOptions::default().with_env_path(&dir);

        let cfg = load_app_config(&options).unwrap();
        assert_eq!(cfg.local.prometheus.endpoint, "/metrics");

        // Consul is enabled by default and needs an address.
        if std::env::var_os("CONSUL_GENERAL_URL").is_none() {
            assert!(matches!(load_local(&options), Err(ConfigError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_local_only_channel_stays_open() {
        let shutdown = Shutdown::new();
        let (service, mut changes) = ConfigService::start(
            AppConfig::valid_local(),
            RemoteStores::local_only(),
            WatchSettings::default(),
            &shutdown,
        )
        .await
        .unwrap();

        assert!(service.is_local_only());
        let waited = tokio::time::timeout(Duration::from_millis(20), changes.recv()).await;
        assert!(waited.is_err(), "local-only channel must stay silent and open");
    }

    #[tokio::test]
    async fn test_start_applies_remote_values_before_validation() {
        let kv = Arc::new(MemoryKvStore::new());
        let secrets = Arc::new(MemorySecretStore::new());
        kv.put(Namespace::Service, "RABBIT_PASS", "services/rabbit");
        secrets.put("services/rabbit", "from-vault");

        let mut cfg = AppConfig::valid_local();
        cfg.local.rabbit.pass.clear();

        let shutdown = Shutdown::new();
        let (service, _changes) = ConfigService::start(
            cfg,
            RemoteStores::new(kv, secrets),
            WatchSettings::default(),
            &shutdown,
        )
        .await
        .unwrap();

        assert_eq!(service.current().local.rabbit.pass, "from-vault");
        assert!(service.state().had_secret("RABBIT_PASS"));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_merged_config() {
        let shutdown = Shutdown::new();
        let result = ConfigService::start(
            AppConfig::default(),
            RemoteStores::new(Arc::new(MemoryKvStore::new()), Arc::new(MemorySecretStore::new())),
            WatchSettings::default(),
            &shutdown,
        )
        .await;

        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_start_fails_when_initial_resolution_fails() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set_failing(true);

        let shutdown = Shutdown::new();
        let result = ConfigService::start(
            AppConfig::valid_local(),
            RemoteStores::new(kv, Arc::new(MemorySecretStore::new())),
            WatchSettings::default(),
            &shutdown,
        )
        .await;

        assert!(matches!(result, Err(ConfigError::Resolve(_))));
    }
}
