//! 静态注册表
//!
//! 固定的 `服务名 -> [地址]` 映射，构造后不再变化。
//! 订阅时回放当前成员，之后通道保持静默直到停止。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::registry::state::RegistryState;
use crate::registry::watcher::{DEFAULT_WATCH_BUFFER, WatchStop};
use crate::registry::{Instance, Registry, RegistryChange};

pub struct StaticRegistry {
    state: Arc<RegistryState>,
}

impl StaticRegistry {
    pub fn new(services: HashMap<String, Vec<String>>) -> Self {
        let state = Arc::new(RegistryState::new(DEFAULT_WATCH_BUFFER));
        for (service, addrs) in services {
            let instances = addrs
                .into_iter()
                .map(|addr| Instance::new(service.as_str(), addr))
                .collect();
            state.commit(&service, instances);
        }
        Self { state }
    }

    /// 便捷构造：`[("orders", &["10.0.0.1:9000"])]`
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(service, addrs)| {
                    (
                        service.to_string(),
                        addrs.iter().map(|addr| addr.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn register(&self, _instance: Instance) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    fn instances(&self, service: &str) -> Vec<Instance> {
        self.state.instances(service)
    }

    fn watch(&self, service: &str) -> (mpsc::Receiver<RegistryChange>, WatchStop) {
        self.state.watch(service)
    }
}
