//! 轮询注册表测试
//!
//! 使用脚本化的目录数据源和暂停的 tokio 时钟，不依赖外部服务。

use async_trait::async_trait;
use flare_shard_discovery::registry::{
    CatalogEntry, CatalogSource, ChangeType, PollingOptions, PollingRegistry, Registry, RegistryChange,
};
use flare_shard_discovery::{Result, RoutingError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const PERIOD: Duration = Duration::from_secs(10);

/// 按顺序返回预设结果，脚本用完后重复最后一次成功的结果
#[derive(Clone, Default)]
struct ScriptedCatalog {
    script: Arc<Mutex<VecDeque<Result<Vec<CatalogEntry>>>>>,
    last: Arc<Mutex<Vec<CatalogEntry>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl ScriptedCatalog {
    fn new(script: Vec<Result<Vec<CatalogEntry>>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Default::default()
        }
    }

    fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    fn queried_names(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl CatalogSource for ScriptedCatalog {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<CatalogEntry>> {
        self.queries.lock().push(service.to_string());
        match self.script.lock().pop_front() {
            Some(Ok(entries)) => {
                *self.last.lock() = entries.clone();
                Ok(entries)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().clone()),
        }
    }
}

fn entry(node: &str) -> CatalogEntry {
    CatalogEntry::new(node, 9000)
}

fn drain(rx: &mut mpsc::Receiver<RegistryChange>) -> Vec<(ChangeType, String)> {
    let mut events = Vec::new();
    while let Ok(change) = rx.try_recv() {
        events.push((change.change_type, change.instance.address().to_string()));
    }
    events
}

fn options() -> PollingOptions {
    PollingOptions::default().with_refresh_interval(PERIOD)
}

#[tokio::test(start_paused = true)]
async fn test_poll_sequence_emits_minimal_changes() {
    let catalog = ScriptedCatalog::new(vec![
        Ok(vec![]),
        Ok(vec![entry("x1")]),
        Ok(vec![entry("x1"), entry("x2")]),
        Ok(vec![entry("x2")]),
    ]);
    let registry = PollingRegistry::new(catalog.clone(), options()).unwrap();

    let (mut rx, stop) = registry.watch("svc");
    tokio::time::sleep(PERIOD * 3 + PERIOD / 2).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            (ChangeType::Registered, "x1:9000".to_string()),
            (ChangeType::Registered, "x2:9000".to_string()),
            (ChangeType::Deregistered, "x1:9000".to_string()),
        ]
    );
    let current: Vec<String> = registry
        .instances("svc")
        .iter()
        .map(|i| i.address().to_string())
        .collect();
    assert_eq!(current, vec!["x2:9000".to_string()]);
    assert_eq!(catalog.query_count(), 4);
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn test_query_failure_keeps_previous_snapshot() {
    let catalog = ScriptedCatalog::new(vec![
        Ok(vec![entry("x1")]),
        Err(RoutingError::catalog("connection refused")),
        Ok(vec![entry("x1"), entry("x2")]),
    ]);
    let registry = PollingRegistry::new(catalog, options()).unwrap();

    let (mut rx, _stop) = registry.watch("svc");
    tokio::time::sleep(PERIOD / 2).await;
    assert_eq!(drain(&mut rx), vec![(ChangeType::Registered, "x1:9000".to_string())]);

    // 失败的一轮：没有事件，快照不变
    tokio::time::sleep(PERIOD).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(registry.instances("svc").len(), 1);

    tokio::time::sleep(PERIOD).await;
    assert_eq!(drain(&mut rx), vec![(ChangeType::Registered, "x2:9000".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_deregisters_everything() {
    let catalog = ScriptedCatalog::new(vec![Ok(vec![entry("x1")]), Ok(vec![])]);
    let registry = PollingRegistry::new(catalog, options()).unwrap();

    let (mut rx, _stop) = registry.watch("svc");
    tokio::time::sleep(PERIOD + PERIOD / 2).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            (ChangeType::Registered, "x1:9000".to_string()),
            (ChangeType::Deregistered, "x1:9000".to_string()),
        ]
    );
    assert!(registry.instances("svc").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_alias_resolves_backend_name() {
    let catalog = ScriptedCatalog::new(vec![Ok(vec![entry("x1")])]);
    let registry = PollingRegistry::new(
        catalog.clone(),
        options().with_alias("orders", "orders-v2"),
    )
    .unwrap();

    let (mut rx, _stop) = registry.watch("orders");
    tokio::time::sleep(PERIOD / 2).await;

    assert_eq!(catalog.queried_names(), vec!["orders-v2".to_string()]);
    let events: Vec<RegistryChange> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(events.len(), 1);
    // 实例仍然归属逻辑服务名
    assert_eq!(events[0].instance.service_name(), "orders");
}

#[tokio::test(start_paused = true)]
async fn test_single_poller_per_service() {
    let catalog = ScriptedCatalog::new(vec![Ok(vec![entry("x1")])]);
    let registry = PollingRegistry::new(catalog.clone(), options()).unwrap();

    let (mut rx1, stop1) = registry.watch("svc");
    let (mut rx2, stop2) = registry.watch("svc");
    assert_eq!(registry.active_pollers(), 1);

    tokio::time::sleep(PERIOD / 2).await;
    assert_eq!(catalog.query_count(), 1);
    assert_eq!(drain(&mut rx1).len(), 1);
    assert_eq!(drain(&mut rx2).len(), 1);

    stop1.stop();
    assert_eq!(registry.active_pollers(), 1);
    stop2.stop();
    assert_eq!(registry.active_pollers(), 0);

    // 最后一个订阅者离开后不再查询
    let queries = catalog.query_count();
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(catalog.query_count(), queries);
}

#[tokio::test(start_paused = true)]
async fn test_late_watcher_gets_replay() {
    let catalog = ScriptedCatalog::new(vec![Ok(vec![entry("x1"), entry("x2")])]);
    let registry = PollingRegistry::new(catalog, options()).unwrap();

    let (_rx1, _stop1) = registry.watch("svc");
    tokio::time::sleep(PERIOD / 2).await;

    let (mut rx2, _stop2) = registry.watch("svc");
    assert_eq!(drain(&mut rx2).len(), 2);
}

#[tokio::test]
async fn test_manual_refresh_without_watchers() {
    let catalog = ScriptedCatalog::new(vec![Ok(vec![entry("x1")])]);
    let registry = PollingRegistry::new(catalog, options()).unwrap();

    assert!(registry.instances("svc").is_empty());
    registry.refresh("svc").await;
    assert_eq!(registry.instances("svc").len(), 1);
    assert_eq!(registry.active_pollers(), 0);
}

#[test]
fn test_new_requires_runtime() {
    let result = PollingRegistry::new(ScriptedCatalog::default(), options());
    assert!(matches!(result, Err(RoutingError::Config(_))));
}
