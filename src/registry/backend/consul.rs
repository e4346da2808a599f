//! Consul 目录后端
//!
//! 通过 Consul 健康检查接口查询通过检查的实例，地址格式为 `节点名:服务端口`。

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{Result, RoutingError};
use crate::registry::polling::{CatalogEntry, CatalogSource, PollingOptions, PollingRegistry};

/// 基于 Consul 的轮询注册表
pub type ConsulRegistry = PollingRegistry<ConsulCatalog>;

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct HealthEntry {
    Node: ConsulNode,
    Service: ConsulService,
}

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct ConsulNode {
    Node: String,
}

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct ConsulService {
    Port: u16,
}

/// Consul 目录
#[derive(Clone)]
pub struct ConsulCatalog {
    http_client: Arc<HttpClient>,
    consul_url: String,
    datacenter: Option<String>,
}

impl ConsulCatalog {
    /// 创建新的 Consul 目录
    ///
    /// # 参数
    /// * `consul_url` - Consul HTTP 地址，如 `http://127.0.0.1:8500`
    /// * `datacenter` - 数据中心（可选，为空时使用 agent 所在数据中心）
    pub fn new(consul_url: impl Into<String>, datacenter: Option<String>) -> Result<Self> {
        let consul_url = consul_url.into().trim_end_matches('/').to_string();
        if consul_url.is_empty() {
            return Err(RoutingError::config("consul address is empty"));
        }

        Ok(Self {
            http_client: Arc::new(HttpClient::new()),
            consul_url,
            datacenter: datacenter.filter(|dc| !dc.is_empty()),
        })
    }

    /// 创建以该目录为数据源的轮询注册表
    pub fn into_registry(self, options: PollingOptions) -> Result<ConsulRegistry> {
        PollingRegistry::new(self, options)
    }

    pub fn consul_url(&self) -> &str {
        &self.consul_url
    }
}

#[async_trait]
impl CatalogSource for ConsulCatalog {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<CatalogEntry>> {
        let url = format!("{}/v1/health/service/{}", self.consul_url, service);
        let mut query_params = vec![("passing", "true")];
        if let Some(dc) = &self.datacenter {
            query_params.push(("dc", dc.as_str()));
        }

        let resp = self
            .http_client
            .get(&url)
            .query(&query_params)
            .send()
            .await
            .map_err(RoutingError::catalog)?
            .error_for_status()
            .map_err(RoutingError::catalog)?;

        let entries: Vec<HealthEntry> = resp.json().await.map_err(RoutingError::catalog)?;
        Ok(entries
            .into_iter()
            .map(|entry| CatalogEntry::new(entry.Node.Node, entry.Service.Port))
            .collect())
    }
}
