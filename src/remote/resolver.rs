//! Resolution of registry fields against the remote stores.
//!
//! # Responsibilities
//! - Fetch each field's override from the distributed store
//! - Follow discovery links to fill address-list fields
//! - Follow secret fields through the secret store
//!
//! # Design Decisions
//! - Fields resolve sequentially; a cycle costs the sum of its round-trips
//! - A missing key means "no override", never an error
//! - Any other failure aborts the whole cycle so a snapshot is never partial

use std::sync::Arc;

use thiserror::Error;

use crate::config::registry::{Classification, Envs};
use crate::config::schema::LOCAL_STAND;
use crate::config::value::RawValue;
use crate::remote::{KvStore, Namespace, RemoteStores, SecretStore, StoreError};

/// Errors that abort a resolution cycle.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// One of the store clients was never initialized.
    #[error("remote clients unavailable: {0}")]
    ClientsUnavailable(&'static str),

    /// The distributed store failed for a reason other than a missing key.
    #[error("failed to fetch \"{field}\" from the distributed store: {source}")]
    RemoteFetchFailed {
        field: String,
        #[source]
        source: StoreError,
    },

    /// A secret referenced by a field could not be fetched.
    #[error("failed to fetch secret for \"{field}\": {source}")]
    SecretFetchFailed {
        field: String,
        #[source]
        source: StoreError,
    },
}

/// Resolves a registry into a fully populated snapshot.
#[derive(Clone)]
pub struct Resolver {
    kv: Option<Arc<dyn KvStore>>,
    secrets: Option<Arc<dyn SecretStore>>,
    stand_name: String,
}

impl Resolver {
    pub fn new(stores: RemoteStores, stand_name: impl Into<String>) -> Self {
        Self {
            kv: stores.kv,
            secrets: stores.secrets,
            stand_name: stand_name.into(),
        }
    }

    /// Resolves every field of `registry`.
    ///
    /// The input is only used as a template; the returned snapshot starts
    /// with no values.
    pub async fn resolve(&self, registry: &Envs) -> Result<Envs, ResolveError> {
        let kv = self
            .kv
            .as_deref()
            .ok_or(ResolveError::ClientsUnavailable("empty distributed store client"))?;
        let secrets = self
            .secrets
            .as_deref()
            .ok_or(ResolveError::ClientsUnavailable("empty secret store client"))?;

        let mut result = registry.cleared();

        for (name, params) in registry {
            let namespace = match params.classification {
                Classification::Global => Namespace::Global,
                Classification::Local | Classification::Discovery => Namespace::Service,
            };

            let raw = match kv.fetch_value(namespace, name).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_key_not_found() => {
                    tracing::trace!(field = %name, "No remote override");
                    continue;
                }
                Err(e) => {
                    return Err(ResolveError::RemoteFetchFailed {
                        field: name.clone(),
                        source: e,
                    })
                }
            };

            // Structured overrides have no agreed encoding yet.
            if params.is_structured {
                tracing::debug!(field = %name, "Skipping structured remote override");
                continue;
            }

            let value = String::from_utf8_lossy(&raw).into_owned();
            if value.is_empty() {
                continue;
            }

            if params.classification == Classification::Discovery {
                tracing::error!(
                    field = %name,
                    "Discovery addresses cannot be set from the distributed store; delete this key from the KV storage"
                );
                continue;
            }

            result.set_value(name, RawValue::Str(value.clone()));

            if let Some(companion) = &params.discovery_link {
                let endpoints = kv.fetch_service_endpoints(&value).await.map_err(|e| {
                    ResolveError::RemoteFetchFailed {
                        field: companion.clone(),
                        source: e,
                    }
                })?;
                let endpoints = crate::remote::dedup_addresses(endpoints);

                if endpoints.is_empty() && self.stand_name != LOCAL_STAND {
                    tracing::warn!(
                        service = %value,
                        field = %companion,
                        "Discovery returned no endpoints; field will be empty"
                    );
                }

                result.set_value(companion, RawValue::Addresses(endpoints));
            }

            if params.is_secret {
                let secret = secrets.fetch_secret(&value).await.map_err(|e| {
                    ResolveError::SecretFetchFailed {
                        field: name.clone(),
                        source: e,
                    }
                })?;
                result.set_external_value(name, RawValue::from(secret));
            }
        }

        Ok(result)
    }
}
