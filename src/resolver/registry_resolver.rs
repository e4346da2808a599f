//! 基于注册表的解析器
//!
//! 构造时立即推送一次快照，随后在后台循环中等待注册表变更或取消信号。
//! 每次变更都重新读取完整快照推送，而不是逐条应用事件，因此丢失或乱序的单个事件不影响最终结果。

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, RoutingError};
use crate::registry::{Registry, RegistryChange, Service, WatchStop};
use crate::resolver::{
    Address, AddressSink, DEFAULT_SCHEME, Resolver, ResolverBuilder, ResolverState, Target,
};

/// 注册表解析器构建器
pub struct RegistryResolverBuilder {
    registry: Arc<dyn Registry>,
    scheme: String,
}

impl RegistryResolverBuilder {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    /// 安装到非默认 scheme
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

impl ResolverBuilder for RegistryResolverBuilder {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn build(&self, target: &Target, sink: Arc<dyn AddressSink>) -> Result<Box<dyn Resolver>> {
        let resolver = RegistryResolver::start(Service::new(target.endpoint()), self.registry.clone(), sink)?;
        Ok(Box::new(resolver))
    }
}

/// 注册表解析器
///
/// 两个状态：运行中、已关闭。`close()` 和 drop 都会取消后台循环并停止注册表订阅。
pub struct RegistryResolver {
    service: Service,
    registry: Arc<dyn Registry>,
    sink: Arc<dyn AddressSink>,
    cancel: CancellationToken,
}

impl RegistryResolver {
    /// 创建解析器并启动后台循环，必须在 tokio 运行时内调用
    pub fn start(service: Service, registry: Arc<dyn Registry>, sink: Arc<dyn AddressSink>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| RoutingError::config("registry resolver must be built inside a tokio runtime"))?;

        let resolver = Self {
            service,
            registry,
            sink,
            cancel: CancellationToken::new(),
        };

        // 先订阅再推送，订阅之后的任何变化都会触发一次重新推送
        let (changes, stop) = resolver.registry.watch(resolver.service.name());
        resolver.update_addresses_from_registry();

        runtime.spawn(watch_loop(
            resolver.service.clone(),
            resolver.registry.clone(),
            resolver.sink.clone(),
            resolver.cancel.clone(),
            changes,
            stop,
        ));
        Ok(resolver)
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn update_addresses_from_registry(&self) {
        push_addresses(&self.service, self.registry.as_ref(), self.sink.as_ref());
    }
}

impl Resolver for RegistryResolver {
    fn resolve_now(&self) {
        // 关闭后不再推送
        if self.cancel.is_cancelled() {
            return;
        }
        self.update_addresses_from_registry();
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RegistryResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 读取完整快照推送给通道，推送失败只记录日志
fn push_addresses(service: &Service, registry: &dyn Registry, sink: &dyn AddressSink) {
    let instances = registry.instances(service.name());
    let addresses: Vec<Address> = instances
        .iter()
        .map(|instance| Address::new(instance.address(), instance.service_name()))
        .collect();

    debug!(service = %service.name(), addresses = ?addresses, "setting new service addresses from registry");
    if let Err(e) = sink.update_state(ResolverState { addresses }) {
        error!(service = %service.name(), error = %e, "service connection update failed from registry");
    }
}

async fn watch_loop(
    service: Service,
    registry: Arc<dyn Registry>,
    sink: Arc<dyn AddressSink>,
    cancel: CancellationToken,
    mut changes: mpsc::Receiver<RegistryChange>,
    stop: WatchStop,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(service = %service.name(), "resolver closed");
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else {
                    info!(service = %service.name(), "registry closed watch channel");
                    break;
                };
                debug!(
                    service = %service.name(),
                    address = %change.instance.address(),
                    change = ?change.change_type,
                    "got services update from registry"
                );

                // 合并已经排队的事件，反正推送的是完整快照
                while changes.try_recv().is_ok() {}
                push_addresses(&service, registry.as_ref(), sink.as_ref());
            }
        }
    }
    stop.stop();
}
