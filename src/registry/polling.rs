//! 轮询注册表
//!
//! 按固定周期向外部目录查询健康实例，计算差异后提交到快照并广播。
//! 每个被订阅的服务只有一个轮询任务，第一次 `watch()` 时启动，最后一个订阅者离开时取消。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, RoutingError};
use crate::registry::state::RegistryState;
use crate::registry::watcher::{DEFAULT_WATCH_BUFFER, WatchStop};
use crate::registry::{Instance, Registry, RegistryChange};

/// 目录中的一条健康记录：节点标识 + 端口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub node: String,
    pub port: u16,
}

impl CatalogEntry {
    pub fn new(node: impl Into<String>, port: u16) -> Self {
        Self {
            node: node.into(),
            port,
        }
    }

    /// 实例地址（`node:port`）
    pub fn address(&self) -> String {
        format!("{}:{}", self.node, self.port)
    }
}

/// 外部目录查询接口
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    /// 查询服务当前的健康实例
    ///
    /// `service` 是后端名（已经过别名转换）。
    async fn healthy_instances(&self, service: &str) -> Result<Vec<CatalogEntry>>;
}

/// 轮询注册表配置
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// 刷新周期
    pub refresh_interval: Duration,
    /// 逻辑服务名 -> 后端服务名
    pub aliases: HashMap<String, String>,
    /// 每个订阅通道的容量
    pub watch_buffer: usize,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            aliases: HashMap::new(),
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl PollingOptions {
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_alias(mut self, service: impl Into<String>, backend_name: impl Into<String>) -> Self {
        self.aliases.insert(service.into(), backend_name.into());
        self
    }

    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_watch_buffer(mut self, watch_buffer: usize) -> Self {
        self.watch_buffer = watch_buffer;
        self
    }
}

struct Poller {
    id: Uuid,
    cancel: CancellationToken,
}

struct PollingInner<S> {
    source: S,
    options: PollingOptions,
    state: Arc<RegistryState>,
    pollers: Mutex<HashMap<String, Poller>>,
    runtime: Handle,
}

/// 轮询注册表
///
/// 查询失败时保留上一次的快照，下一次定时再试，订阅者不会收到错误。
/// 查询结果为空时记录告警，但仍然按空集合提交（所有实例都会收到 `Deregistered`）。
pub struct PollingRegistry<S> {
    inner: Arc<PollingInner<S>>,
}

impl<S: CatalogSource> PollingRegistry<S> {
    /// 创建轮询注册表，必须在 tokio 运行时内调用
    pub fn new(source: S, options: PollingOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            RoutingError::config("polling registry must be created inside a tokio runtime")
        })?;

        Ok(Self {
            inner: Arc::new(PollingInner {
                state: Arc::new(RegistryState::new(options.watch_buffer)),
                source,
                options,
                pollers: Mutex::new(HashMap::new()),
                runtime,
            }),
        })
    }

    /// 底层目录
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// 正在轮询的服务数量
    pub fn active_pollers(&self) -> usize {
        self.inner.pollers.lock().len()
    }

    /// 立即刷新一次服务（不等待下一个周期）
    pub async fn refresh(&self, service: &str) {
        let backend_name = self.inner.backend_name(service);
        self.inner.refresh(service, &backend_name).await;
    }
}

impl<S: CatalogSource> PollingInner<S> {
    fn backend_name(&self, service: &str) -> String {
        match self.options.aliases.get(service) {
            Some(alias) => {
                info!(service = %service, alias = %alias, "using alias to resolve service");
                alias.clone()
            }
            None => {
                warn!(service = %service, "no alias defined for service");
                service.to_string()
            }
        }
    }

    async fn refresh(&self, service: &str, backend_name: &str) {
        let entries = match self.source.healthy_instances(backend_name).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(service = %service, error = %e, "failed listing catalog for service");
                return;
            }
        };

        let instances: Vec<Instance> = entries
            .iter()
            .map(|entry| Instance::new(service, entry.address()))
            .collect();
        if instances.is_empty() {
            warn!(service = %service, "could not find any instances for service");
        }

        let before = self.state.instances(service).len();
        let changes = self.state.commit(service, instances);
        if !changes.is_empty() {
            info!(
                service = %service,
                from = before,
                to = self.state.instances(service).len(),
                changes = changes.len(),
                "updated registry instances for service"
            );
        }
    }

    /// 没有订阅者时注销自己的轮询任务，返回是否应退出
    fn release_if_idle(&self, service: &str, poller_id: Uuid) -> bool {
        let mut pollers = self.pollers.lock();
        if self.state.watcher_count(service) > 0 {
            return false;
        }
        if pollers.get(service).is_some_and(|poller| poller.id == poller_id) {
            pollers.remove(service);
        }
        true
    }

    fn stop_watcher(&self, service: &str, watcher_id: Uuid) {
        let mut pollers = self.pollers.lock();
        if self.state.unsubscribe(service, watcher_id) == Some(0) {
            if let Some(poller) = pollers.remove(service) {
                poller.cancel.cancel();
            }
        }
    }
}

async fn poll_service<S: CatalogSource>(
    inner: Arc<PollingInner<S>>,
    service: String,
    poller_id: Uuid,
    cancel: CancellationToken,
) {
    let backend_name = inner.backend_name(&service);
    info!(service = %service, period = ?inner.options.refresh_interval, "watching changes for service");

    let mut ticker = tokio::time::interval(inner.options.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.refresh(&service, &backend_name) => {}
        }

        if inner.release_if_idle(&service, poller_id) {
            info!(service = %service, "no watchers left, stopping poller");
            return;
        }
    }
    info!(service = %service, "canceled watch for service");
}

#[async_trait]
impl<S: CatalogSource> Registry for PollingRegistry<S> {
    async fn register(&self, _instance: Instance) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    fn instances(&self, service: &str) -> Vec<Instance> {
        self.inner.state.instances(service)
    }

    fn watch(&self, service: &str) -> (mpsc::Receiver<RegistryChange>, WatchStop) {
        let mut pollers = self.inner.pollers.lock();
        let (watcher_id, rx) = self.inner.state.subscribe(service);

        if !pollers.contains_key(service) {
            let poller = Poller {
                id: Uuid::new_v4(),
                cancel: CancellationToken::new(),
            };
            self.inner.runtime.spawn(poll_service(
                self.inner.clone(),
                service.to_string(),
                poller.id,
                poller.cancel.clone(),
            ));
            pollers.insert(service.to_string(), poller);
        }
        drop(pollers);

        let inner = Arc::downgrade(&self.inner);
        let service = service.to_string();
        let stop = WatchStop::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.stop_watcher(&service, watcher_id);
            }
        });
        (rx, stop)
    }
}

impl<S> Drop for PollingRegistry<S> {
    fn drop(&mut self) {
        for (_, poller) in self.inner.pollers.lock().drain() {
            poller.cancel.cancel();
        }
    }
}
