//! 文件注册表
//!
//! 从 YAML / JSON / TOML 文档读取 `服务名 -> [地址]` 映射。
//! 可选监听文件变化，每次变化重新加载并对所有受影响的服务做一次差异提交。
//! 首次加载时空的 YAML / TOML 文档表示没有任何服务；重新加载时读到空文件视为正在被改写，
//! 保留上一次的快照。需要清空所有服务时写入空映射（YAML `{}`）。
//!
//! ```yaml
//! aggregator:
//!   - aggregator1.internal:9000
//!   - aggregator2.internal:9000
//! ingest:
//!   - ingest.internal:9000
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Result, RoutingError};
use crate::registry::state::RegistryState;
use crate::registry::watcher::{DEFAULT_WATCH_BUFFER, WatchStop};
use crate::registry::{Instance, Registry, RegistryChange};

/// 文件注册表配置
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// 是否监听文件变化，默认关闭
    pub watch: bool,
    /// 每个订阅通道的容量
    pub watch_buffer: usize,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            watch: false,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl FileOptions {
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_watch_buffer(mut self, watch_buffer: usize) -> Self {
        self.watch_buffer = watch_buffer;
        self
    }
}

/// 注册表文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            "json" => Ok(DocumentFormat::Json),
            "toml" => Ok(DocumentFormat::Toml),
            other => Err(RoutingError::parse(
                path.display().to_string(),
                format!("unsupported registry file extension `{}`", other),
            )),
        }
    }
}

type ServiceMap = BTreeMap<String, Vec<String>>;

/// 读取并解析注册表文档
fn load_document(path: &Path, allow_empty: bool) -> Result<ServiceMap> {
    let format = DocumentFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    let display = path.display().to_string();

    let empty = content.trim().is_empty();
    if empty && !allow_empty {
        return Err(RoutingError::parse(display, "empty registry document"));
    }

    match format {
        DocumentFormat::Yaml => {
            if empty {
                return Ok(ServiceMap::new());
            }
            serde_yaml::from_str(&content).map_err(|e| RoutingError::parse(display, e))
        }
        DocumentFormat::Json => {
            serde_json::from_str(&content).map_err(|e| RoutingError::parse(display, e))
        }
        DocumentFormat::Toml => toml::from_str(&content).map_err(|e| RoutingError::parse(display, e)),
    }
}

struct FileInner {
    path: PathBuf,
    state: Arc<RegistryState>,
    /// 串行化读取与提交，先读到的文档不会覆盖后读到的
    reload_lock: Mutex<()>,
}

impl FileInner {
    fn load(&self, initial: bool) -> Result<usize> {
        let _guard = self.reload_lock.lock();
        let document = load_document(&self.path, initial)?;

        let mut services: BTreeSet<String> = self.state.services().into_iter().collect();
        services.extend(document.keys().cloned());

        let mut total = 0;
        for service in services {
            let instances = document
                .get(&service)
                .map(|addrs| {
                    addrs
                        .iter()
                        .map(|addr| Instance::new(service.as_str(), addr.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            total += self.state.commit(&service, instances).len();
        }
        Ok(total)
    }
}

/// 文件注册表
///
/// 构造时文件缺失或格式错误直接失败；之后的重新加载失败只记录告警并保留上一次的快照。
pub struct FileRegistry {
    inner: Arc<FileInner>,
    #[cfg(feature = "file")]
    _watcher: Option<notify::RecommendedWatcher>,
}

impl FileRegistry {
    /// 打开注册表文件
    ///
    /// 开启 `watch` 时必须在 tokio 运行时内调用。
    pub fn open(path: impl AsRef<Path>, options: FileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = Arc::new(FileInner {
            path,
            state: Arc::new(RegistryState::new(options.watch_buffer)),
            reload_lock: Mutex::new(()),
        });
        inner.load(true)?;
        info!(path = %inner.path.display(), services = inner.state.services().len(), "file registry loaded");

        #[cfg(feature = "file")]
        {
            let watcher = if options.watch {
                Some(spawn_file_watcher(inner.clone())?)
            } else {
                None
            };
            Ok(Self {
                inner,
                _watcher: watcher,
            })
        }

        #[cfg(not(feature = "file"))]
        {
            if options.watch {
                return Err(RoutingError::NotSupported(
                    "file watching requires the `file` feature",
                ));
            }
            Ok(Self { inner })
        }
    }

    /// 重新读取文件并广播差异，返回产生的变更数
    ///
    /// 解析失败或文档为空时返回错误，快照保持不变。
    /// 并发调用依次执行，最终快照总是来自最后一次读取。
    pub fn reload(&self) -> Result<usize> {
        self.inner.load(false)
    }

    /// 注册表文件路径
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// 服务当前的订阅者数量
    pub fn watcher_count(&self, service: &str) -> usize {
        self.inner.state.watcher_count(service)
    }
}

#[cfg(feature = "file")]
fn spawn_file_watcher(inner: Arc<FileInner>) -> Result<notify::RecommendedWatcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        RoutingError::config("watching a file registry requires a tokio runtime")
    })?;

    let file_name = inner
        .path
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| RoutingError::config("registry path has no file name"))?;
    let parent = match inner.path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::channel::<()>(16);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(file_name.as_os_str()));
                if relevant {
                    // 已有待处理的重新加载时合并
                    let _ = tx.try_send(());
                }
            }
            Err(e) => warn!(error = %e, "file registry watch error"),
        }
    })
    .map_err(|e| RoutingError::Watch(e.to_string()))?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .map_err(|e| RoutingError::Watch(e.to_string()))?;

    runtime.spawn(async move {
        while rx.recv().await.is_some() {
            match inner.load(false) {
                Ok(changes) => {
                    info!(path = %inner.path.display(), changes, "registry updated");
                }
                Err(e) => {
                    warn!(path = %inner.path.display(), error = %e, "error reloading file registry, keeping previous snapshot");
                }
            }
        }
    });

    Ok(watcher)
}

#[async_trait]
impl Registry for FileRegistry {
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
        self.inner.state.watch(service)
    }
}
