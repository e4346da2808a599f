//! 空注册表：不知道任何服务

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::registry::watcher::WatchStop;
use crate::registry::{Instance, Registry, RegistryChange};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

#[async_trait]
impl Registry for NoopRegistry {
    async fn register(&self, _instance: Instance) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    fn instances(&self, _service: &str) -> Vec<Instance> {
        Vec::new()
    }

    fn watch(&self, _service: &str) -> (mpsc::Receiver<RegistryChange>, WatchStop) {
        let (tx, rx) = mpsc::channel(1);
        (rx, WatchStop::new(move || drop(tx)))
    }
}
