//! Vault HTTP API client (KV v2 secrets engine).
//!
//! # Responsibilities
//! - Read the `value` entry of a secret path
//! - Keep the client token alive while the process runs
//!
//! # Design Decisions
//! - Root and non-expiring tokens are never renewed
//! - A token that cannot be renewed within its last minute ends the renewal
//!   task with an error; the caller decides whether that is fatal

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::remote::{SecretStore, StoreError};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Interval between token lookups.
pub const RENEW_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Requested lifetime extension on renewal.
const RENEW_INCREMENT: &str = "8h";

/// Vault client settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub address: String,
    pub token: String,
    pub mount_path: String,
    pub timeout: Duration,
}

/// Vault-backed `SecretStore`.
pub struct VaultClient {
    http: reqwest::Client,
    base: url::Url,
    config: VaultConfig,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    data: SecretData,
}

#[derive(Debug, Deserialize)]
struct SecretData {
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: TokenInfo,
}

/// Subset of the token lookup response used for renewal decisions.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub expire_time: Option<String>,
    #[serde(default)]
    pub renewable: bool,
    /// Seconds until expiry.
    #[serde(default)]
    pub ttl: u64,
}

/// What the renewal loop should do with a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewPlan {
    /// Root or non-expiring token: stop renewing.
    Stop,
    /// Renew; `time_left` is what remains if renewal fails.
    Renew { time_left: Duration },
}

impl TokenInfo {
    pub fn plan(&self) -> Result<RenewPlan, StoreError> {
        if self.display_name == "root" || self.expire_time.is_none() {
            return Ok(RenewPlan::Stop);
        }

        if !self.renewable {
            return Err(StoreError::Token("vault token is not renewable".to_string()));
        }

        Ok(RenewPlan::Renew {
            time_left: Duration::from_secs(self.ttl),
        })
    }
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> Result<Self, StoreError> {
        let base = url::Url::parse(&config.address).map_err(|e| {
            StoreError::Decode(format!("invalid vault address '{}': {}", config.address, e))
        })?;
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        tracing::info!(address = %config.address, mount = %config.mount_path, "Vault client initialized");

        Ok(Self { http, base, config })
    }

    /// API path of a KV v2 secret.
    pub fn secret_path(&self, path: &str) -> String {
        format!(
            "v1/{}/data/{}",
            self.config.mount_path.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, StoreError> {
        self.base
            .join(path)
            .map_err(|e| StoreError::Decode(format!("invalid vault path '{}': {}", path, e)))
    }

    /// Reads `key` from the secret at `path`.
    pub async fn fetch_secret_key(&self, path: &str, key: &str) -> Result<serde_json::Value, StoreError> {
        let url = self.endpoint(&self.secret_path(path))?;
        let response = self
            .http
            .get(url.clone())
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StoreError::KeyNotFound(path.to_string())),
            status if !status.is_success() => {
                return Err(StoreError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                })
            }
            _ => {}
        }

        let secret: SecretResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        extract_key(secret, path, key)
    }

    pub async fn lookup_self(&self) -> Result<TokenInfo, StoreError> {
        let url = self.endpoint("v1/auth/token/lookup-self")?;
        let response = self
            .http
            .get(url.clone())
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(lookup.data)
    }

    pub async fn renew_self(&self) -> Result<(), StoreError> {
        let url = self.endpoint("v1/auth/token/renew-self")?;
        let response = self
            .http
            .post(url.clone())
            .header(TOKEN_HEADER, &self.config.token)
            .json(&serde_json::json!({ "increment": RENEW_INCREMENT }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    /// Keeps the token alive until shutdown.
    ///
    /// Returns `Ok` when the token needs no renewal or on shutdown.
    pub async fn run_token_renewal(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), StoreError> {
        loop {
            let info = self.lookup_self().await?;

            let time_left = match info.plan()? {
                RenewPlan::Stop => {
                    tracing::info!("Vault token is root or non-expiring, renewal stopped");
                    return Ok(());
                }
                RenewPlan::Renew { time_left } => time_left,
            };

            match self.renew_self().await {
                Ok(()) => tracing::debug!("Vault token renewed"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to renew vault token");
                    if time_left <= Duration::from_secs(60) {
                        return Err(StoreError::Token(format!("failed to renew token: {}", e)));
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RENEW_INTERVAL) => {}
                _ = shutdown.recv() => {
                    tracing::debug!("Vault token renewal received shutdown signal");
                    return Ok(());
                }
            }
        }
    }
}

fn extract_key(secret: SecretResponse, path: &str, key: &str) -> Result<serde_json::Value, StoreError> {
    secret
        .data
        .data
        .get(key)
        .cloned()
        .ok_or_else(|| StoreError::MissingSecretValue(path.to_string()))
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn fetch_secret(&self, path: &str) -> Result<serde_json::Value, StoreError> {
        self.fetch_secret_key(path, "value").await
    }
}
