//! 分片负载均衡
//!
//! 用一致性哈希环把调用方提供的分片键映射到就绪连接。相同的键在连接集合不变时总是
//! 落到同一个后端；移除一个节点只会迁移原本落在该节点上的键。
//!
//! 调用方在请求扩展中放入 [`ShardKey`]（或设置 `x-shard-key` 元数据）：
//!
//! ```rust,ignore
//! let mut request = tonic::Request::new(GetOrderRequest { id });
//! request.extensions_mut().insert(ShardKey::new(user_id));
//! client.get_order(request).await?;
//! ```

use hashring::HashRing;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::balancer::{BalancerBuilder, ErrPicker, PickInfo, Picker, PickerBuildInfo, PickerBuilder};
use crate::error::{Result, RoutingError};

/// 分片策略名
pub const SHARD_POLICY_NAME: &str = "shard";

/// 分片键元数据头
pub const SHARD_KEY_HEADER: &str = "x-shard-key";

/// 缺少分片键时使用的哨兵键
pub const NOT_FOUND_SHARD_KEY: &str = "NOT_FOUND";

/// 每个地址默认的虚拟节点数
pub const DEFAULT_REPLICAS: u32 = 64;

/// 请求扩展中的分片键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey(pub String);

impl ShardKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 从调用上下文提取分片键
pub type ShardKeyFn = Arc<dyn Fn(&PickInfo<'_>) -> Option<String> + Send + Sync>;

/// 默认提取逻辑：先读请求扩展中的 [`ShardKey`]，再读 `x-shard-key` 元数据
pub fn default_shard_key(info: &PickInfo<'_>) -> Option<String> {
    if let Some(key) = info.extensions.get::<ShardKey>() {
        return Some(key.0.clone());
    }
    info.headers
        .get(SHARD_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// 调用缺少分片键时的处理方式
///
/// 默认使用哨兵键，所有未带键的调用会集中到同一个后端。流量中大量调用不带键时，
/// 应改为 `Reject` 或 `Random`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "key", rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// 用固定的哨兵键哈希
    Sentinel(String),
    /// 调用失败
    Reject,
    /// 随机挑选一个就绪连接
    Random,
}

impl Default for MissingKeyPolicy {
    fn default() -> Self {
        MissingKeyPolicy::Sentinel(NOT_FOUND_SHARD_KEY.to_string())
    }
}

/// 分片负载均衡配置
#[derive(Clone)]
pub struct ShardOptions {
    pub replicas: u32,
    pub key_fn: ShardKeyFn,
    pub missing_key: MissingKeyPolicy,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            key_fn: Arc::new(default_shard_key),
            missing_key: MissingKeyPolicy::default(),
        }
    }
}

impl fmt::Debug for ShardOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardOptions")
            .field("replicas", &self.replicas)
            .field("missing_key", &self.missing_key)
            .finish_non_exhaustive()
    }
}

impl ShardOptions {
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas.max(1);
        self
    }

    /// 自定义分片键提取函数
    pub fn with_key_fn(
        mut self,
        key_fn: impl Fn(&PickInfo<'_>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.key_fn = Arc::new(key_fn);
        self
    }

    pub fn with_missing_key(mut self, missing_key: MissingKeyPolicy) -> Self {
        self.missing_key = missing_key;
        self
    }
}

/// 哈希环上的虚拟节点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RingNode {
    address: Arc<str>,
    replica: u32,
}

impl RingNode {
    pub fn new(address: impl Into<Arc<str>>, replica: u32) -> Self {
        Self {
            address: address.into(),
            replica,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// 按就绪地址构建哈希环，每个地址插入 `replicas` 个虚拟节点
pub fn build_ring<'a>(addresses: impl IntoIterator<Item = &'a String>, replicas: u32) -> HashRing<RingNode> {
    let mut ring = HashRing::new();
    for address in addresses {
        let address: Arc<str> = Arc::from(address.as_str());
        for replica in 0..replicas {
            ring.add(RingNode::new(address.clone(), replica));
        }
    }
    ring
}

/// 分片 picker 构建器
///
/// 每次构建都从就绪集合重新生成一份完整的哈希环，每个 picker 独占自己的环，
/// 之后的重建不会改动已经发出的 picker。
/// 上一次的就绪集合只用于记录成员变化的日志，不参与建环。
pub struct ShardPickerBuilder {
    options: ShardOptions,
    tracked: HashSet<String>,
}

impl ShardPickerBuilder {
    pub fn new(options: ShardOptions) -> Self {
        Self {
            options,
            tracked: HashSet::new(),
        }
    }

    /// 上一次构建时的就绪地址，仅供观察
    pub fn tracked(&self) -> &HashSet<String> {
        &self.tracked
    }

    /// 让跟踪的地址与就绪集合完全一致
    fn sync_tracked<'a>(&mut self, ready: impl Iterator<Item = &'a String>) {
        let ready: HashSet<String> = ready.cloned().collect();

        let added: Vec<&String> = ready.difference(&self.tracked).collect();
        let removed: Vec<&String> = self.tracked.difference(&ready).collect();
        if !added.is_empty() || !removed.is_empty() {
            debug!(added = ?added, removed = ?removed, "shard ring membership changed");
        }
        self.tracked = ready;
    }
}

impl<C> PickerBuilder<C> for ShardPickerBuilder
where
    C: Clone + Send + Sync + 'static,
{
    fn build(&mut self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>> {
        info!(ready = info.ready.len(), "shard balancer: building new picker");
        self.sync_tracked(info.ready.keys());

        if info.ready.is_empty() {
            return Arc::new(ErrPicker::no_connection());
        }

        let ring = build_ring(info.ready.keys(), self.options.replicas);
        Arc::new(ShardPicker::new(ring, info.ready, self.options.clone()))
    }
}

/// 分片 picker，构建后不可变
pub struct ShardPicker<C> {
    ring: HashRing<RingNode>,
    connections: HashMap<String, C>,
    options: ShardOptions,
}

impl<C> ShardPicker<C> {
    /// 由哈希环和地址 -> 连接表构造
    ///
    /// 两者应来自同一份就绪集合；环上存在而表中缺失的地址会让对应调用失败。
    pub fn new(ring: HashRing<RingNode>, connections: HashMap<String, C>, options: ShardOptions) -> Self {
        Self {
            ring,
            connections,
            options,
        }
    }
}

impl<C> ShardPicker<C>
where
    C: Clone,
{
    /// 分片键所在的地址
    pub fn route(&self, key: &str) -> Option<&str> {
        self.ring.get(&key).map(RingNode::address)
    }

    fn pick_random(&self) -> Result<C> {
        self.connections
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(RoutingError::NoConnectionAvailable)
    }
}

impl<C> Picker<C> for ShardPicker<C>
where
    C: Clone + Send + Sync,
{
    fn pick(&self, info: &PickInfo<'_>) -> Result<C> {
        let shard_key = match (self.options.key_fn)(info) {
            Some(key) => key,
            None => match &self.options.missing_key {
                MissingKeyPolicy::Sentinel(key) => key.clone(),
                MissingKeyPolicy::Reject => return Err(RoutingError::MissingShardKey),
                MissingKeyPolicy::Random => return self.pick_random(),
            },
        };

        let address = self
            .route(&shard_key)
            .ok_or(RoutingError::NoConnectionAvailable)?;

        match self.connections.get(address) {
            Some(connection) => Ok(connection.clone()),
            None => {
                error!(address = %address, shard_key = %shard_key, "shard ring points to address without connection");
                Err(RoutingError::RingInconsistent {
                    address: address.to_string(),
                })
            }
        }
    }
}

/// 分片负载均衡策略插件
pub struct ShardBalancerBuilder {
    name: String,
    options: ShardOptions,
}

impl ShardBalancerBuilder {
    pub fn new(options: ShardOptions) -> Self {
        Self::named(SHARD_POLICY_NAME, options)
    }

    /// 以自定义策略名注册
    pub fn named(name: impl Into<String>, options: ShardOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

impl Default for ShardBalancerBuilder {
    fn default() -> Self {
        Self::new(ShardOptions::default())
    }
}

impl<C> BalancerBuilder<C> for ShardBalancerBuilder
where
    C: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Box<dyn PickerBuilder<C>> {
        Box::new(ShardPickerBuilder::new(self.options.clone()))
    }
}
