//! Layered config service.
//!
//! ```text
//!   .env / environment ──▶ BootstrapConfig ──▶ Consul + Vault clients
//!            │                                        │
//!            ▼                                        ▼
//!        AppConfig ◀──── overrides, discovery, secrets (Resolver)
//!            │
//!            ▼
//!     ConfigService ──▶ watcher (150-250s) ──▶ changed field names
//! ```

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use layered_config::config::loader::{ConfigError, LoadOptions};
use layered_config::config::mutator::redacted_view;
use layered_config::config::registry::{build_registry, Configurable};
use layered_config::config::service::{load_app_config, load_local, resolve_once, ConfigService};
use layered_config::config::WatchSettings;
use layered_config::lifecycle::{wait_for_signal, Shutdown};
use layered_config::observability::{init_logging, LogHandle};
use layered_config::remote::Resolver;

#[derive(Parser)]
#[command(name = "layered-config")]
#[command(about = "Layered configuration resolution with remote hot reload", long_about = None)]
struct Cli {
    /// Directory holding the .env file
    #[arg(long, global = true)]
    env_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the config service and log every change batch
    Run,
    /// Resolve once and print the effective configuration
    Resolve {
        /// Environment only: no bootstrap settings, Consul or Vault
        #[arg(long)]
        local_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let log = init_logging();

    let mut options = LoadOptions::default();
    if let Some(path) = cli.env_path {
        options = options.with_env_path(path);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(options, log).await,
        Commands::Resolve { local_only } => resolve(options, local_only).await,
    }
}

async fn run(options: LoadOptions, log: LogHandle) -> Result<(), Box<dyn Error>> {
    tracing::info!("layered-config v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let (mut service, mut changes) =
        ConfigService::bootstrap(&options, WatchSettings::default(), &shutdown).await?;
    let state = service.state();

    {
        let config = state.current();
        apply_log_level(&log, &config.global.log_level);
        tracing::info!(
            service = %config.local.service_name,
            stand = %config.local.stand_name,
            local_only = service.is_local_only(),
            "Config service started"
        );
    }

    let signal = wait_for_signal();
    tokio::pin!(signal);

    let result = loop {
        tokio::select! {
            Some(changed) = changes.recv() => {
                tracing::info!(changed = ?changed, "Changed environments");
                if changed.iter().any(|name| name == "LOG_LEVEL") {
                    apply_log_level(&log, &state.current().global.log_level);
                }
            }
            err = service.fatal_error() => {
                tracing::error!(error = %err, "Config service failed");
                break Err(err.into());
            }
            sig = &mut signal => {
                match sig {
                    Ok(name) => tracing::info!(signal = name, "Shutdown signal received"),
                    Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break Ok(());
            }
        }
    };

    shutdown.trigger();
    tracing::info!("Shutdown complete");
    result
}

async fn resolve(options: LoadOptions, local_only: bool) -> Result<(), Box<dyn Error>> {
    let config = if local_only {
        load_app_config(&options)?
    } else {
        let (mut config, stores, _vault) = load_local(&options)?;
        if stores.is_enabled() {
            let registry = build_registry(&config).map_err(ConfigError::Registry)?;
            let resolver = Resolver::new(stores, config.stand_name());
            resolve_once(&mut config, &registry, &resolver).await?;
        }
        config
    };

    config.validate().map_err(ConfigError::Validation)?;
    println!("{}", serde_json::to_string_pretty(&redacted_view(&config))?);
    Ok(())
}

fn apply_log_level(log: &LogHandle, level: &str) {
    if level.is_empty() {
        return;
    }
    match log.apply_level(level) {
        Ok(true) => tracing::info!(level = %level, "Log level applied"),
        Ok(false) => tracing::debug!("RUST_LOG is set, LOG_LEVEL ignored"),
        Err(e) => tracing::warn!(error = %e, "Failed to apply log level"),
    }
}
