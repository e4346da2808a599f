//! tonic 通道适配
//!
//! [`ShardChannel`] 实现 `tower::Service`，可以直接交给 tonic 生成的客户端：
//! 每个请求先经过分片 picker 选出后端 `Channel`，再由该通道发送。

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tonic::body::Body;
use tonic::transport::{Channel, Endpoint};
use tower::{Service, ServiceExt};

use crate::balancer::PickInfo;
use crate::channel::{ClientConn, Connector};
use crate::error::{Result, RoutingError};
use crate::resolver::Address;

/// 为每个地址创建惰性连接的 tonic 连接器
#[derive(Debug, Clone)]
pub struct TonicConnector {
    connect_timeout: Duration,
    timeout: Option<Duration>,
}

impl Default for TonicConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: None,
        }
    }
}

impl TonicConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 单次请求超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Connector<Channel> for TonicConnector {
    fn connect(&self, address: &Address) -> Result<Channel> {
        let uri = if address.addr.contains("://") {
            address.addr.clone()
        } else {
            format!("http://{}", address.addr)
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| RoutingError::Connect {
                address: address.addr.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }

        // 真正的连接在第一次请求时建立，断线后由 tonic 重连
        Ok(endpoint.connect_lazy())
    }
}

/// 按分片键路由的 tonic 通道
#[derive(Clone)]
pub struct ShardChannel {
    conn: Arc<ClientConn<Channel>>,
}

impl ShardChannel {
    pub fn new(conn: Arc<ClientConn<Channel>>) -> Self {
        Self { conn }
    }

    /// 底层连接表
    pub fn conn(&self) -> &Arc<ClientConn<Channel>> {
        &self.conn
    }
}

impl Service<http::Request<Body>> for ShardChannel {
    type Response = http::Response<Body>;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        // 就绪与否在 pick 时判断
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let picked = {
            let info = PickInfo::new(request.uri().path(), request.headers(), request.extensions());
            self.conn.pick(&info)
        };

        Box::pin(async move {
            let channel = picked.map_err(|e| Box::new(tonic::Status::from(e)) as tower::BoxError)?;
            let response = channel.oneshot(request).await?;
            Ok(response)
        })
    }
}
