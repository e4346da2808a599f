//! 名称解析模块
//!
//! 定义 RPC 通道与 resolver 之间的边界：
//! - [`Target`]: `scheme://authority/endpoint` 形式的目标，`endpoint` 即服务名
//! - [`AddressSink`]: 通道提供的地址接收方，每次接收完整的地址列表
//! - [`ResolverBuilder`] / [`Resolver`]: 按 scheme 安装的解析器插件

pub mod registry_resolver;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, RoutingError};

pub use registry_resolver::{RegistryResolver, RegistryResolverBuilder};

/// 注册表解析器的默认 scheme
pub const DEFAULT_SCHEME: &str = "registry";

/// 解析目标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

impl Target {
    /// 解析 `scheme:///service` 或 `scheme://authority/service`
    pub fn parse(target: &str) -> Result<Self> {
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| RoutingError::InvalidTarget(format!("missing scheme in `{}`", target)))?;
        if scheme.is_empty() {
            return Err(RoutingError::InvalidTarget(format!("empty scheme in `{}`", target)));
        }

        let (authority, endpoint) = rest.split_once('/').unwrap_or(("", rest));
        let endpoint = endpoint.trim_matches('/');
        if endpoint.is_empty() {
            return Err(RoutingError::InvalidTarget(format!("missing endpoint in `{}`", target)));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    /// 目标服务名
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FromStr for Target {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}

/// 解析出的单个地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub addr: String,
    pub service_name: String,
}

impl Address {
    pub fn new(addr: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            service_name: service_name.into(),
        }
    }
}

/// 推送给通道的完整解析状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
}

impl ResolverState {
    pub fn addrs(&self) -> Vec<&str> {
        self.addresses.iter().map(|address| address.addr.as_str()).collect()
    }
}

/// 地址接收方（由 RPC 通道实现）
pub trait AddressSink: Send + Sync {
    /// 用完整地址列表替换通道当前状态
    fn update_state(&self, state: ResolverState) -> Result<()>;

    /// resolver 遇到错误时通知通道
    fn report_error(&self, error: RoutingError) {
        warn!(error = %error, "resolver reported error");
    }
}

/// 解析器
pub trait Resolver: Send + Sync {
    /// 立即重新解析并推送
    fn resolve_now(&self);

    /// 关闭解析器，可以重复调用
    fn close(&self);
}

/// 解析器构建器
pub trait ResolverBuilder: Send + Sync {
    /// 处理的 scheme
    fn scheme(&self) -> &str;

    /// 为目标创建解析器，地址通过 `sink` 推送
    fn build(&self, target: &Target, sink: Arc<dyn AddressSink>) -> Result<Box<dyn Resolver>>;
}
