//! 路由层配置
//!
//! 从 TOML 文件加载，各段都有默认值，可以只写需要覆盖的字段。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::balancer::shard::{DEFAULT_REPLICAS, MissingKeyPolicy, SHARD_POLICY_NAME, ShardOptions};
use crate::error::{Result, RoutingError};
use crate::registry::watcher::DEFAULT_WATCH_BUFFER;
use crate::resolver::DEFAULT_SCHEME;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl RoutingConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RoutingError::parse(path.display().to_string(), e))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(RoutingError::config)
    }
}

/// 注册表后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Consul,
    File,
    Static,
    #[default]
    Noop,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "consul" => Ok(BackendType::Consul),
            "file" => Ok(BackendType::File),
            "static" => Ok(BackendType::Static),
            "noop" | "none" => Ok(BackendType::Noop),
            _ => Err(format!("Unknown registry backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: BackendType,

    /// 目录服务地址（consul）
    pub address: Option<String>,

    /// 数据中心（consul）
    pub datacenter: Option<String>,

    /// 逻辑服务名 -> 后端服务名
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// 刷新间隔（秒）
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// 订阅通道容量
    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,

    /// 注册表文件（file）
    pub path: Option<PathBuf>,

    /// 是否监听文件变化（file）
    #[serde(default)]
    pub watch: bool,

    /// 固定映射（static）
    #[serde(default)]
    pub services: HashMap<String, Vec<String>>,
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_watch_buffer() -> usize {
    DEFAULT_WATCH_BUFFER
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            address: None,
            datacenter: None,
            aliases: HashMap::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
            watch_buffer: default_watch_buffer(),
            path: None,
            watch: false,
            services: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    #[serde(default = "default_policy")]
    pub policy: String,

    /// 每个地址在哈希环上的虚拟节点数
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// 调用上下文缺少分片键时的处理方式
    #[serde(default)]
    pub missing_key: MissingKeyPolicy,
}

fn default_policy() -> String {
    SHARD_POLICY_NAME.to_string()
}

fn default_replicas() -> u32 {
    DEFAULT_REPLICAS
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            replicas: default_replicas(),
            missing_key: MissingKeyPolicy::default(),
        }
    }
}

impl BalancerConfig {
    pub fn shard_options(&self) -> ShardOptions {
        ShardOptions::default()
            .with_replicas(self.replicas)
            .with_missing_key(self.missing_key.clone())
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
