//! Consul HTTP API client.
//!
//! # Responsibilities
//! - Read raw KV values under `{stand}/global/{key}` and
//!   `{stand}/local/{service}/{key}`
//! - Look up healthy instances of a service for discovery links
//!
//! # Design Decisions
//! - A 404 from the KV endpoint is reported as `StoreError::KeyNotFound`
//! - Every request carries its own timeout; no retries here, the watcher's
//!   next tick is the retry

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::remote::{dedup_addresses, KvStore, Namespace, ServiceAddress, StoreError};

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul client settings.
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    pub address: String,
    pub token: String,
    pub service_name: String,
    pub stand_name: String,
    pub timeout: Duration,
}

/// Consul-backed `KvStore`.
pub struct ConsulClient {
    http: reqwest::Client,
    base: url::Url,
    config: ConsulConfig,
}

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    /// Keyed by tag (`lan_ipv4`, `wan_ipv4`, ...); ordered so repeated
    /// lookups yield the same endpoint list.
    #[serde(rename = "TaggedAddresses", default)]
    tagged_addresses: Option<BTreeMap<String, ServiceAddress>>,
}

impl ConsulClient {
    pub fn new(config: ConsulConfig) -> Result<Self, StoreError> {
        let base = parse_address(&config.address)?;
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        tracing::info!(address = %config.address, stand = %config.stand_name, "Consul client initialized");

        Ok(Self { http, base, config })
    }

    /// KV path of `key` inside `namespace`.
    pub fn key_path(&self, namespace: Namespace, key: &str) -> String {
        match namespace {
            Namespace::Global => format!("{}/global/{}", self.config.stand_name, key),
            Namespace::Service => format!(
                "{}/local/{}/{}",
                self.config.stand_name, self.config.service_name, key
            ),
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, StoreError> {
        self.base
            .join(path)
            .map_err(|e| StoreError::Decode(format!("invalid consul path '{}': {}", path, e)))
    }
}

/// Parses the agent address. `host:port` without a scheme means plain HTTP.
fn parse_address(address: &str) -> Result<url::Url, StoreError> {
    let invalid = |reason: String| StoreError::Decode(format!("invalid consul address '{}': {}", address, reason));

    let full = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let base = url::Url::parse(&full).map_err(|e| invalid(e.to_string()))?;
    if base.cannot_be_a_base() || base.host_str().is_none() {
        return Err(invalid("not a base URL".to_string()));
    }
    Ok(base)
}

#[async_trait]
impl KvStore for ConsulClient {
    async fn fetch_value(&self, namespace: Namespace, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut url = self.endpoint(&format!("v1/kv/{}", self.key_path(namespace, key)))?;
        url.set_query(Some("raw"));

        let response = self
            .http
            .get(url.clone())
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::KeyNotFound(key.to_string())),
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            status => Err(StoreError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn fetch_service_endpoints(&self, service: &str) -> Result<Vec<ServiceAddress>, StoreError> {
        let mut url = self.endpoint(&format!("v1/health/service/{}", service))?;
        url.set_query(Some("passing=true"));

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

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(collect_addresses(entries))
    }
}

fn collect_addresses(entries: Vec<HealthEntry>) -> Vec<ServiceAddress> {
    dedup_addresses(
        entries
            .into_iter()
            .filter_map(|entry| entry.service.tagged_addresses)
            .flat_map(|tagged| tagged.into_values()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ConsulClient {
        ConsulClient::new(ConsulConfig {
            address: "http://127.0.0.1:8500".to_string(),
            token: "token".to_string(),
            service_name: "rate-limit".to_string(),
            stand_name: "dev".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_key_paths() {
        let c = client();
        assert_eq!(c.key_path(Namespace::Global, "LOG_LEVEL"), "dev/global/LOG_LEVEL");
        assert_eq!(
            c.key_path(Namespace::Service, "PROMETHEUS_PORT"),
            "dev/local/rate-limit/PROMETHEUS_PORT"
        );
    }

    fn client_at(address: &str) -> Result<ConsulClient, StoreError> {
        ConsulClient::new(ConsulConfig {
            address: address.to_string(),
            token: String::new(),
            service_name: "svc".to_string(),
            stand_name: "dev".to_string(),
            timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(client_at("not a url").is_err());
        assert!(client_at("unix:///var/run/consul.sock").is_err());
    }

    #[test]
    fn test_address_without_scheme_defaults_to_http() {
        let c = client_at("127.0.0.1:8500").unwrap();
        assert_eq!(
            c.endpoint("v1/kv/dev/global/LOG_LEVEL").unwrap().as_str(),
            "http://127.0.0.1:8500/v1/kv/dev/global/LOG_LEVEL"
        );

        let c = client_at("consul:8500").unwrap();
        assert_eq!(c.endpoint("v1/status/leader").unwrap().as_str(), "http://consul:8500/v1/status/leader");

        let c = client_at("https://consul.internal").unwrap();
        assert_eq!(c.endpoint("v1/status/leader").unwrap().as_str(), "https://consul.internal/v1/status/leader");
    }

    const HEALTH_BODY: &str = r#"[
        {"Service": {"TaggedAddresses": {
            "wan_ipv4": {"Address": "203.0.113.9", "Port": 5432},
            "lan_ipv4": {"Address": "10.0.0.1", "Port": 5432}
        }}},
        {"Service": {"TaggedAddresses": {
            "lan_ipv4": {"Address": "10.0.0.2", "Port": 5432},
            "lan_ipv6": {"Address": "10.0.0.2", "Port": 5432}
        }}},
        {"Service": {}}
    ]"#;

    #[test]
    fn test_health_response_parsing() {
        let entries: Vec<HealthEntry> = serde_json::from_str(HEALTH_BODY).unwrap();

        assert_eq!(
            collect_addresses(entries),
            vec![
                ServiceAddress::new("10.0.0.1", 5432),
                ServiceAddress::new("203.0.113.9", 5432),
                ServiceAddress::new("10.0.0.2", 5432),
            ]
        );
    }

    #[test]
    fn test_health_response_order_is_stable() {
        let parse = || collect_addresses(serde_json::from_str(HEALTH_BODY).unwrap());
        let first = parse();

        for _ in 0..50 {
            assert_eq!(parse(), first);
        }
    }
}
