//! 服务注册表模块
//!
//! 注册表把逻辑服务名解析为当前可用的实例集合，并把成员变化以事件形式推送给订阅者。
//! 后端在构造时选择（Consul 轮询、文件、静态、空），对外只暴露 [`Registry`] 这一个能力接口。

pub mod backend;
pub mod diff;
pub mod factory;
pub mod file;
pub mod instance;
pub mod noop;
pub mod polling;
pub mod state;
pub mod static_registry;
pub mod watcher;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use diff::diff;
pub use factory::RegistryFactory;
pub use file::{FileOptions, FileRegistry};
pub use instance::{ChangeType, Instance, RegistryChange, Service};
pub use noop::NoopRegistry;
pub use polling::{CatalogEntry, CatalogSource, PollingOptions, PollingRegistry};
pub use state::RegistryState;
pub use static_registry::StaticRegistry;
pub use watcher::{DEFAULT_WATCH_BUFFER, WatchStop};

#[cfg(feature = "consul")]
pub use backend::consul::{ConsulCatalog, ConsulRegistry};

/// 服务注册表
///
/// 所有后端共享同一订阅语义：
/// - `watch()` 返回前，当前成员已作为 `Registered` 事件写入通道（同步回放）
/// - 之后每次成员变化，每个订阅者各自收到一份事件，慢订阅者不会拖慢其他订阅者
/// - 订阅通道有界，满时丢弃事件并记录告警；需要权威状态时重新调用 `instances()`
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册实例（只读后端为空操作）
    async fn register(&self, instance: Instance) -> Result<()>;

    /// 注销实例（只读后端为空操作）
    async fn deregister(&self, instance: &Instance) -> Result<()>;

    /// 返回服务最近一次完整解析的快照，不做任何网络 IO
    fn instances(&self, service: &str) -> Vec<Instance>;

    /// 订阅服务的成员变化
    fn watch(&self, service: &str) -> (mpsc::Receiver<RegistryChange>, WatchStop);
}
