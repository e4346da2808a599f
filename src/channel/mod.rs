//! 客户端通道
//!
//! [`ClientConn`] 是 resolver 与负载均衡器之间的连接表：
//! 接收 resolver 推送的完整地址列表，为新地址建立连接、关闭消失的地址，
//! 就绪集合变化时让负载均衡器重建 picker。

pub mod tonic_channel;

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::balancer::{Balancer, PickInfo, PickerBuilder};
use crate::error::{Result, RoutingError};
use crate::resolver::{Address, AddressSink, ResolverState};

pub use tonic_channel::{ShardChannel, TonicConnector};

/// 为单个地址建立连接
pub trait Connector<C>: Send + Sync {
    fn connect(&self, address: &Address) -> Result<C>;
}

impl<C, F> Connector<C> for F
where
    F: Fn(&Address) -> Result<C> + Send + Sync,
{
    fn connect(&self, address: &Address) -> Result<C> {
        self(address)
    }
}

struct ConnTable<C> {
    conns: HashMap<String, C>,
    unready: HashSet<String>,
    built: bool,
    closed: bool,
}

impl<C: Clone> ConnTable<C> {
    fn ready(&self) -> HashMap<String, C> {
        self.conns
            .iter()
            .filter(|(addr, _)| !self.unready.contains(*addr))
            .map(|(addr, conn)| (addr.clone(), conn.clone()))
            .collect()
    }
}

/// 通道连接表
pub struct ClientConn<C> {
    connector: Arc<dyn Connector<C>>,
    balancer: Balancer<C>,
    table: Mutex<ConnTable<C>>,
}

impl<C> ClientConn<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(connector: Arc<dyn Connector<C>>, picker_builder: Box<dyn PickerBuilder<C>>) -> Self {
        Self {
            connector,
            balancer: Balancer::new(picker_builder),
            table: Mutex::new(ConnTable {
                conns: HashMap::new(),
                unready: HashSet::new(),
                built: false,
                closed: false,
            }),
        }
    }

    /// 为一次调用挑选连接
    pub fn pick(&self, info: &PickInfo<'_>) -> Result<C> {
        self.balancer.pick(info)
    }

    /// 当前就绪的地址，按字典序
    pub fn ready_addresses(&self) -> Vec<String> {
        let table = self.table.lock();
        let ready: BTreeSet<&String> = table
            .conns
            .keys()
            .filter(|addr| !table.unready.contains(*addr))
            .collect();
        ready.into_iter().cloned().collect()
    }

    /// 连接恢复可用
    pub fn mark_ready(&self, address: &str) {
        let mut table = self.table.lock();
        if table.unready.remove(address) {
            debug!(address = %address, "connection ready");
            self.rebuild(&mut table);
        }
    }

    /// 连接暂时不可用，移出就绪集合但保留连接
    pub fn mark_unready(&self, address: &str) {
        let mut table = self.table.lock();
        if table.conns.contains_key(address) && table.unready.insert(address.to_string()) {
            debug!(address = %address, "connection not ready");
            self.rebuild(&mut table);
        }
    }

    /// 关闭通道，释放所有连接，之后的地址推送返回 [`RoutingError::SinkClosed`]
    pub fn close(&self) {
        let mut table = self.table.lock();
        if table.closed {
            return;
        }
        table.closed = true;
        table.conns.clear();
        table.unready.clear();
        self.balancer.update(HashMap::new());
        info!("client connection closed");
    }

    fn rebuild(&self, table: &mut ConnTable<C>) {
        table.built = true;
        self.balancer.update(table.ready());
    }
}

impl<C> AddressSink for ClientConn<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn update_state(&self, state: ResolverState) -> Result<()> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(RoutingError::SinkClosed);
        }

        let wanted: HashSet<&str> = state.addresses.iter().map(|a| a.addr.as_str()).collect();
        let before = table.ready().into_keys().collect::<HashSet<_>>();

        table.conns.retain(|addr, _| wanted.contains(addr.as_str()));
        let ConnTable { conns, unready, .. } = &mut *table;
        unready.retain(|addr| conns.contains_key(addr));

        for address in &state.addresses {
            if table.conns.contains_key(&address.addr) {
                continue;
            }
            match self.connector.connect(address) {
                Ok(conn) => {
                    debug!(address = %address.addr, service = %address.service_name, "connection created");
                    table.conns.insert(address.addr.clone(), conn);
                }
                Err(e) => {
                    warn!(address = %address.addr, error = %e, "failed to create connection, skipping address");
                }
            }
        }

        let after = table.ready().into_keys().collect::<HashSet<_>>();
        if !table.built || before != after {
            info!(ready = after.len(), "ready connection set changed");
            self.rebuild(&mut table);
        }
        Ok(())
    }

    fn report_error(&self, error: RoutingError) {
        warn!(error = %error, "resolver error, keeping current connections");
    }
}
