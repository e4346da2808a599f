//! 负载均衡模块
//!
//! 与 RPC 框架的边界分成两步：
//! - 构建：就绪连接集合变化时，框架单线程调用 [`PickerBuilder::build`]，得到新的 picker
//! - 挑选：每次调用并发地执行 [`Picker::pick`]，picker 构建后不可变
//!
//! [`Balancer`] 持有当前 picker，每次重建后整体替换。

pub mod shard;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RoutingError};

pub use shard::{
    MissingKeyPolicy, RingNode, SHARD_KEY_HEADER, SHARD_POLICY_NAME, ShardBalancerBuilder, ShardKey,
    ShardKeyFn, ShardOptions, ShardPicker, ShardPickerBuilder,
};

/// 单次调用的挑选上下文
#[derive(Debug, Clone, Copy)]
pub struct PickInfo<'a> {
    /// gRPC 方法路径，如 `/orders.Orders/Get`
    pub method: &'a str,
    /// 请求元数据
    pub headers: &'a http::HeaderMap,
    /// 请求扩展（调用方在这里放入 [`ShardKey`]）
    pub extensions: &'a http::Extensions,
}

impl<'a> PickInfo<'a> {
    pub fn new(method: &'a str, headers: &'a http::HeaderMap, extensions: &'a http::Extensions) -> Self {
        Self {
            method,
            headers,
            extensions,
        }
    }
}

/// 构建 picker 所需的信息：地址 -> 就绪连接
#[derive(Debug, Clone)]
pub struct PickerBuildInfo<C> {
    pub ready: HashMap<String, C>,
}

impl<C> PickerBuildInfo<C> {
    pub fn new(ready: HashMap<String, C>) -> Self {
        Self { ready }
    }
}

/// 连接挑选器
pub trait Picker<C>: Send + Sync {
    fn pick(&self, info: &PickInfo<'_>) -> Result<C>;
}

/// picker 构建器，框架保证不会并发调用 `build`
pub trait PickerBuilder<C>: Send {
    fn build(&mut self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>>;
}

/// 负载均衡策略插件，每个通道得到一个独立的 picker 构建器
pub trait BalancerBuilder<C>: Send + Sync {
    /// 策略名
    fn name(&self) -> &str;

    fn build(&self) -> Box<dyn PickerBuilder<C>>;
}

/// 总是失败的 picker
pub struct ErrPicker {
    make_error: fn() -> RoutingError,
}

impl ErrPicker {
    pub fn new(make_error: fn() -> RoutingError) -> Self {
        Self { make_error }
    }

    /// 没有任何就绪连接
    pub fn no_connection() -> Self {
        Self::new(|| RoutingError::NoConnectionAvailable)
    }
}

impl<C> Picker<C> for ErrPicker {
    fn pick(&self, _info: &PickInfo<'_>) -> Result<C> {
        Err((self.make_error)())
    }
}

/// 负载均衡器
///
/// 状态：尚无 picker -> picker 生效；每次就绪集合变化都用新 picker 原子替换旧的。
/// 正在执行的挑选继续使用它拿到的旧 picker。
pub struct Balancer<C> {
    builder: Mutex<Box<dyn PickerBuilder<C>>>,
    picker: RwLock<Option<Arc<dyn Picker<C>>>>,
}

impl<C> Balancer<C> {
    pub fn new(builder: Box<dyn PickerBuilder<C>>) -> Self {
        Self {
            builder: Mutex::new(builder),
            picker: RwLock::new(None),
        }
    }

    /// 用新的就绪集合重建 picker
    pub fn update(&self, ready: HashMap<String, C>) {
        let mut builder = self.builder.lock();
        let picker = builder.build(PickerBuildInfo::new(ready));
        *self.picker.write() = Some(picker);
    }

    /// 当前 picker
    pub fn picker(&self) -> Option<Arc<dyn Picker<C>>> {
        self.picker.read().clone()
    }

    /// 为一次调用挑选连接；首次构建之前总是失败
    pub fn pick(&self, info: &PickInfo<'_>) -> Result<C> {
        match self.picker() {
            Some(picker) => picker.pick(info),
            None => Err(RoutingError::NoConnectionAvailable),
        }
    }
}
