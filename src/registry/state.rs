//! 注册表快照与订阅者状态
//!
//! 每个后端实例持有一个 `RegistryState`：
//! - `services`: 服务名 -> 当前实例列表，一把读写锁
//! - `watchers`: 服务名 -> 订阅者列表，另一把读写锁
//!
//! 加锁顺序固定为先 `services` 后 `watchers`。`commit` 在同一个临界区内完成
//! 比较、替换和广播，广播只使用 `try_send`，因此持锁期间不会阻塞。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::diff::{dedup_by_address, diff};
use crate::registry::instance::{Instance, RegistryChange};
use crate::registry::watcher::{DEFAULT_WATCH_BUFFER, Delivery, Subscriber, WatchStop};

pub struct RegistryState {
    services: RwLock<HashMap<String, Vec<Instance>>>,
    watchers: RwLock<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
}

impl RegistryState {
    /// 创建空状态，`buffer` 为每个订阅通道的容量
    pub fn new(buffer: usize) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// 返回服务的最新快照，从未解析过的服务返回空列表
    pub fn instances(&self, service: &str) -> Vec<Instance> {
        self.services
            .read()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// 当前快照中所有服务名
    pub fn services(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// 服务当前的订阅者数量
    pub fn watcher_count(&self, service: &str) -> usize {
        self.watchers
            .read()
            .get(service)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 新增订阅
    ///
    /// 在返回前把当前成员以 `Registered` 事件写入通道，之后的每次提交都会继续投递，
    /// 两者之间不会遗漏也不会重复。
    pub fn subscribe(&self, service: &str) -> (Uuid, mpsc::Receiver<RegistryChange>) {
        let services = self.services.read();
        let current = services.get(service).map(Vec::as_slice).unwrap_or(&[]);
        let replayed = current.len();

        let (tx, rx) = mpsc::channel(self.buffer.max(replayed));
        let subscriber = Subscriber::new(tx);
        for instance in current {
            let _ = subscriber.deliver(&RegistryChange::registered(instance.clone()));
        }

        let id = subscriber.id;
        self.watchers
            .write()
            .entry(service.to_string())
            .or_default()
            .push(subscriber);
        drop(services);

        debug!(service = %service, watcher_id = %id, replayed, "watcher subscribed");
        (id, rx)
    }

    /// 取消订阅，返回剩余订阅者数量；未知 ID（重复停止）返回 `None`
    ///
    /// 订阅者的发送端被移除后，接收端读完剩余事件即关闭。
    pub fn unsubscribe(&self, service: &str, id: Uuid) -> Option<usize> {
        let mut watchers = self.watchers.write();
        let list = watchers.get_mut(service)?;
        let position = list.iter().position(|subscriber| subscriber.id == id)?;
        list.remove(position);

        let remaining = list.len();
        if remaining == 0 {
            watchers.remove(service);
        }
        debug!(service = %service, watcher_id = %id, remaining, "watcher unsubscribed");
        Some(remaining)
    }

    /// 订阅并返回带停止句柄的通道
    pub fn watch(self: &Arc<Self>, service: &str) -> (mpsc::Receiver<RegistryChange>, WatchStop) {
        let (id, rx) = self.subscribe(service);
        let state = Arc::downgrade(self);
        let service = service.to_string();
        let stop = WatchStop::new(move || {
            if let Some(state) = state.upgrade() {
                state.unsubscribe(&service, id);
            }
        });
        (rx, stop)
    }

    /// 用新实例列表替换服务快照并广播差异
    ///
    /// 比较、替换、广播在同一个写锁内完成，并发的 `instances()` 只能看到提交前或提交后的状态。
    /// 空列表会移除该服务的快照。
    pub fn commit(&self, service: &str, instances: Vec<Instance>) -> Vec<RegistryChange> {
        let instances = dedup_by_address(instances);
        let mut services = self.services.write();

        let changes = {
            let old = services.get(service).map(Vec::as_slice).unwrap_or(&[]);
            diff(old, &instances)
        };

        if instances.is_empty() {
            services.remove(service);
        } else {
            services.insert(service.to_string(), instances);
        }

        if !changes.is_empty() {
            self.broadcast(service, &changes);
        }
        changes
    }

    fn broadcast(&self, service: &str, changes: &[RegistryChange]) {
        let mut watchers = self.watchers.write();
        let Some(list) = watchers.get_mut(service) else {
            return;
        };

        list.retain(|subscriber| {
            for change in changes {
                match subscriber.deliver(change) {
                    Delivery::Sent => {}
                    Delivery::Dropped => {
                        warn!(
                            service = %service,
                            watcher_id = %subscriber.id,
                            address = %change.instance.address(),
                            change = ?change.change_type,
                            "watcher channel full, dropping registry change"
                        );
                    }
                    Delivery::Closed => {
                        debug!(service = %service, watcher_id = %subscriber.id, "pruning closed watcher");
                        return false;
                    }
                }
            }
            true
        });

        if list.is_empty() {
            watchers.remove(service);
        }
    }
}

impl Default for RegistryState {
    fn default() -> Self {
        Self::new(DEFAULT_WATCH_BUFFER)
    }
}
