//! Flare Shard Discovery
//!
//! 客户端服务发现与分片感知的 gRPC 负载均衡：
//! - `registry`: 服务注册表抽象，Consul 轮询 / 文件 / 静态 / 空后端
//! - `resolver`: 把 `registry:///service` 目标解析为地址列表并持续推送
//! - `balancer`: 基于一致性哈希的分片负载均衡
//! - `channel`: 连接表与 tonic 通道适配
//! - `plugins`: resolver 与负载均衡策略的注册表

pub mod balancer;
pub mod channel;
pub mod config;
pub mod error;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod telemetry;

// Re-exports
pub use balancer::{
    Balancer, BalancerBuilder, MissingKeyPolicy, PickInfo, Picker, PickerBuilder, SHARD_KEY_HEADER,
    SHARD_POLICY_NAME, ShardBalancerBuilder, ShardKey, ShardOptions,
};
pub use channel::{ClientConn, Connector, ShardChannel, TonicConnector};
pub use config::{BackendType, BalancerConfig, LogConfig, RegistryConfig, ResolverConfig, RoutingConfig};
pub use error::{ErrorCode, Result, RoutingError};
pub use plugins::{Dialed, PluginRegistry, global, install_defaults, install_from_config};
pub use registry::{
    ChangeType, FileOptions, FileRegistry, Instance, NoopRegistry, PollingOptions, PollingRegistry,
    Registry, RegistryChange, RegistryFactory, Service, StaticRegistry, WatchStop,
};
pub use resolver::{
    AddressSink, DEFAULT_SCHEME, RegistryResolver, RegistryResolverBuilder, Resolver, ResolverState,
    Target,
};
pub use telemetry::init_tracing;

#[cfg(feature = "consul")]
pub use registry::{ConsulCatalog, ConsulRegistry};
