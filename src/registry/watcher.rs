//! 订阅句柄与订阅者通道

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::registry::instance::RegistryChange;

/// 默认订阅通道容量
pub const DEFAULT_WATCH_BUFFER: usize = 64;

/// 停止订阅的句柄
///
/// `stop()` 可以重复调用，只有第一次生效。停止后订阅通道关闭，
/// 接收端读完剩余事件后得到 `None`。
///
/// 句柄被丢弃时不会自动停止；如果接收端先被丢弃，后端在下一次广播时清理该订阅。
#[must_use = "call stop() to unsubscribe"]
pub struct WatchStop {
    stop_fn: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl WatchStop {
    pub fn new(stop_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop_fn: Mutex::new(Some(Box::new(stop_fn))),
        }
    }

    /// 取消订阅并关闭通道
    pub fn stop(&self) {
        let stop_fn = self.stop_fn.lock().take();
        if let Some(stop_fn) = stop_fn {
            stop_fn();
        }
    }

    /// 是否已经停止
    pub fn is_stopped(&self) -> bool {
        self.stop_fn.lock().is_none()
    }
}

impl fmt::Debug for WatchStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStop")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// 单个订阅者
pub(crate) struct Subscriber {
    pub(crate) id: Uuid,
    pub(crate) tx: mpsc::Sender<RegistryChange>,
}

/// 非阻塞投递结果
pub(crate) enum Delivery {
    Sent,
    Dropped,
    Closed,
}

impl Subscriber {
    pub(crate) fn new(tx: mpsc::Sender<RegistryChange>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// 投递一个事件，从不阻塞
    ///
    /// 通道已满时丢弃事件；消费者需要权威状态时应重新读取 `instances()`。
    pub(crate) fn deliver(&self, change: &RegistryChange) -> Delivery {
        match self.tx.try_send(change.clone()) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
