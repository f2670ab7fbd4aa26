//! Consul 注册中心实现
//!
//! 走 Consul agent 的 HTTP API：注册/注销用 `/v1/agent/service/*`，
//! 实例查询用 `/v1/health/service/{name}` 的阻塞查询（index + wait），
//! 新版本号从 `X-Consul-Index` 响应头取得。

use crate::error::{CoreError, Result};
use crate::registry::backend::{
    CheckTarget, HealthCheck, RegistryBackend, ServiceEndpoint, ServiceRecord,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 阻塞查询的服务端等待时长
const BLOCK_WAIT: &str = "55s";
/// 单次阻塞查询的客户端超时，略大于服务端等待
const BLOCK_TIMEOUT: Duration = Duration::from_secs(65);

/// Consul 注册中心客户端
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulService {
    ID: String,
    Name: String,
    Tags: Vec<String>,
    Address: String,
    Port: u16,
    Check: ConsulCheck,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    HTTP: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    GRPC: Option<String>,
    Interval: String,
    Timeout: String,
    DeregisterCriticalServiceAfter: String,
}

impl ConsulCheck {
    fn from_check(check: &HealthCheck) -> Self {
        let (http, grpc) = match &check.target {
            CheckTarget::Http(url) => (Some(url.clone()), None),
            CheckTarget::Grpc(addr) => (None, Some(addr.clone())),
        };
        Self {
            HTTP: http,
            GRPC: grpc,
            Interval: format!("{}s", check.interval_secs),
            Timeout: format!("{}s", check.timeout_secs),
            DeregisterCriticalServiceAfter: format!("{}s", check.deregister_after_secs),
        }
    }
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulHealthEntry {
    Service: ConsulServiceEntry,
}

#[allow(non_snake_case)]
#[derive(Deserialize)]
struct ConsulServiceEntry {
    ID: String,
    Address: String,
    Port: u16,
}

impl ConsulRegistry {
    /// 创建客户端，地址不带协议时默认 `http://`
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address
        } else {
            format!("http://{}", address)
        };

        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RegistryBackend for ConsulRegistry {
    async fn register(&self, record: &ServiceRecord) -> Result<()> {
        let payload = ConsulService {
            ID: record.id.clone(),
            Name: record.name.clone(),
            Tags: record.tags.clone(),
            Address: record.address.clone(),
            Port: record.port,
            Check: ConsulCheck::from_check(&record.check),
        };

        let url = format!("{}/v1/agent/service/register", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::registration(&record.id, e.to_string()))?;
        resp.error_for_status()
            .map_err(|e| CoreError::registration(&record.id, e.to_string()))?;

        debug!(service_id = %record.id, service_name = %record.name, "Consul register ok");
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = format!("{}/v1/agent/service/deregister/{}", self.base_url, service_id);
        let resp = self.client.put(&url).send().await?;

        // 未知 ID 视为已注销
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(service_id = %service_id, "Consul deregister: unknown id, treated as ok");
            return Ok(());
        }
        resp.error_for_status()?;

        debug!(service_id = %service_id, "Consul deregister ok");
        Ok(())
    }

    async fn query(
        &self,
        service: &str,
        tags: &[String],
        last_index: u64,
    ) -> Result<(Vec<ServiceEndpoint>, u64)> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service);
        let mut params: Vec<(&str, String)> = vec![
            ("passing", "true".to_string()),
            ("index", last_index.to_string()),
            ("wait", BLOCK_WAIT.to_string()),
        ];
        for tag in tags {
            params.push(("tag", tag.clone()));
        }

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .timeout(BLOCK_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let next_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(last_index);

        let entries: Vec<ConsulHealthEntry> = resp.json().await?;
        let endpoints = entries
            .into_iter()
            .map(|entry| ServiceEndpoint {
                id: entry.Service.ID,
                address: entry.Service.Address,
                port: entry.Service.Port,
            })
            .collect();

        Ok((endpoints, next_index))
    }
}
