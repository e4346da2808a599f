//! 注册表工厂
//!
//! 根据配置在构造时选定后端

use std::sync::Arc;
use tracing::info;

use crate::config::{BackendType, RegistryConfig};
use crate::error::{Result, RoutingError};
use crate::registry::file::{FileOptions, FileRegistry};
use crate::registry::noop::NoopRegistry;
use crate::registry::static_registry::StaticRegistry;
use crate::registry::Registry;

/// 注册表工厂
pub struct RegistryFactory;

impl RegistryFactory {
    /// 从配置创建注册表
    ///
    /// consul 后端和开启监听的文件后端需要在 tokio 运行时内创建。
    pub fn create(config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
        let registry: Arc<dyn Registry> = match config.backend {
            BackendType::Consul => Self::create_consul(config)?,
            BackendType::File => {
                let path = config
                    .path
                    .as_ref()
                    .ok_or_else(|| RoutingError::config("file registry requires `path`"))?;
                let options = FileOptions::default()
                    .with_watch(config.watch)
                    .with_watch_buffer(config.watch_buffer);
                Arc::new(FileRegistry::open(path, options)?)
            }
            BackendType::Static => Arc::new(StaticRegistry::new(config.services.clone())),
            BackendType::Noop => Arc::new(NoopRegistry),
        };

        info!(backend = ?config.backend, "service registry created");
        Ok(registry)
    }

    #[cfg(feature = "consul")]
    fn create_consul(config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
        use crate::registry::backend::consul::ConsulCatalog;
        use crate::registry::polling::PollingOptions;

        let address = config
            .address
            .clone()
            .unwrap_or_else(|| "http://localhost:8500".to_string());
        let options = PollingOptions::default()
            .with_refresh_interval(config.refresh_interval())
            .with_aliases(config.aliases.clone())
            .with_watch_buffer(config.watch_buffer);

        let registry = ConsulCatalog::new(address, config.datacenter.clone())?.into_registry(options)?;
        Ok(Arc::new(registry))
    }

    #[cfg(not(feature = "consul"))]
    fn create_consul(_config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
        Err(RoutingError::NotSupported(
            "consul registry requires the `consul` feature",
        ))
    }
}
