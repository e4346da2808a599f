//! 插件注册表
//!
//! 按 scheme 保存 resolver 构建器，按策略名保存负载均衡构建器。
//! 进程级的注册表通过 [`global()`] 获取，安装需要显式调用 [`install_defaults`]，
//! 不依赖任何隐式初始化。
//!
//! ```rust,ignore
//! let registry = RegistryFactory::create(&config.registry)?;
//! install_defaults(global(), registry, config.balancer.shard_options());
//!
//! let dialed = global().dial("registry:///orders", "shard", Arc::new(TonicConnector::new()))?;
//! let mut client = OrdersClient::new(dialed.channel());
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tonic::transport::Channel;
use tracing::info;

use crate::balancer::{BalancerBuilder, ShardBalancerBuilder, ShardOptions};
use crate::channel::{ClientConn, Connector, ShardChannel};
use crate::config::RoutingConfig;
use crate::error::{Result, RoutingError};
use crate::registry::{Registry, RegistryFactory};
use crate::resolver::{AddressSink, RegistryResolverBuilder, Resolver, ResolverBuilder, Target};

/// resolver 与负载均衡策略的注册表
pub struct PluginRegistry<C> {
    resolvers: RwLock<HashMap<String, Arc<dyn ResolverBuilder>>>,
    balancers: RwLock<HashMap<String, Arc<dyn BalancerBuilder<C>>>>,
}

impl<C> Default for PluginRegistry<C> {
    fn default() -> Self {
        Self {
            resolvers: RwLock::new(HashMap::new()),
            balancers: RwLock::new(HashMap::new()),
        }
    }
}

impl<C> PluginRegistry<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装 resolver，同一 scheme 后安装的覆盖先安装的
    pub fn register_resolver(&self, builder: Arc<dyn ResolverBuilder>) {
        let scheme = builder.scheme().to_string();
        info!(scheme = %scheme, "resolver installed");
        self.resolvers.write().insert(scheme, builder);
    }

    /// 安装负载均衡策略，同名策略后安装的覆盖先安装的
    pub fn register_balancer(&self, builder: Arc<dyn BalancerBuilder<C>>) {
        let name = builder.name().to_string();
        info!(policy = %name, "balancer installed");
        self.balancers.write().insert(name, builder);
    }

    pub fn resolver(&self, scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
        self.resolvers.read().get(scheme).cloned()
    }

    pub fn balancer(&self, policy: &str) -> Option<Arc<dyn BalancerBuilder<C>>> {
        self.balancers.read().get(policy).cloned()
    }

    /// 拨号：解析目标，为通道创建独立的 picker 构建器并启动 resolver
    pub fn dial(&self, target: &str, policy: &str, connector: Arc<dyn Connector<C>>) -> Result<Dialed<C>> {
        let target = Target::parse(target)?;
        let resolver_builder = self
            .resolver(&target.scheme)
            .ok_or_else(|| RoutingError::UnknownScheme(target.scheme.clone()))?;
        let balancer_builder = self
            .balancer(policy)
            .ok_or_else(|| RoutingError::UnknownPolicy(policy.to_string()))?;

        let conn = Arc::new(ClientConn::new(connector, balancer_builder.build()));
        let sink: Arc<dyn AddressSink> = conn.clone();
        let resolver = resolver_builder.build(&target, sink)?;

        info!(target = %target, policy = %policy, "channel dialed");
        Ok(Dialed {
            target,
            conn,
            resolver,
        })
    }
}

/// 拨号结果，丢弃时关闭 resolver 并释放连接
pub struct Dialed<C>
where
    C: Clone + Send + Sync + 'static,
{
    target: Target,
    conn: Arc<ClientConn<C>>,
    resolver: Box<dyn Resolver>,
}

impl<C> Dialed<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn conn(&self) -> &Arc<ClientConn<C>> {
        &self.conn
    }

    /// 立即重新解析
    pub fn resolve_now(&self) {
        self.resolver.resolve_now();
    }
}

impl Dialed<Channel> {
    /// 可以交给 tonic 客户端的通道
    pub fn channel(&self) -> ShardChannel {
        ShardChannel::new(self.conn.clone())
    }
}

impl<C> Drop for Dialed<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.resolver.close();
        self.conn.close();
    }
}

/// 进程级插件注册表，初始为空
pub fn global() -> &'static PluginRegistry<Channel> {
    static GLOBAL: OnceLock<PluginRegistry<Channel>> = OnceLock::new();
    GLOBAL.get_or_init(PluginRegistry::new)
}

/// 安装注册表 resolver（scheme `registry`）和分片负载均衡（策略 `shard`）
pub fn install_defaults<C>(plugins: &PluginRegistry<C>, registry: Arc<dyn Registry>, options: ShardOptions)
where
    C: Clone + Send + Sync + 'static,
{
    plugins.register_resolver(Arc::new(RegistryResolverBuilder::new(registry)));
    plugins.register_balancer(Arc::new(ShardBalancerBuilder::new(options)));
}

/// 按配置创建注册表并安装插件，返回创建出的注册表
pub fn install_from_config<C>(plugins: &PluginRegistry<C>, config: &RoutingConfig) -> Result<Arc<dyn Registry>>
where
    C: Clone + Send + Sync + 'static,
{
    let registry = RegistryFactory::create(&config.registry)?;
    plugins.register_resolver(Arc::new(
        RegistryResolverBuilder::new(registry.clone()).with_scheme(config.resolver.scheme.clone()),
    ));
    plugins.register_balancer(Arc::new(ShardBalancerBuilder::named(
        config.balancer.policy.clone(),
        config.balancer.shard_options(),
    )));
    Ok(registry)
}
