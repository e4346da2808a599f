//! 服务发现与分片路由的统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 路由层统一错误类型
#[derive(Error, Debug)]
pub enum RoutingError {
    /// 没有任何就绪连接
    #[error("no connection available")]
    NoConnectionAvailable,

    /// 哈希环中存在地址，但连接表中没有（不应出现）
    #[error("shard ring points to unknown address `{address}`")]
    RingInconsistent { address: String },

    /// 调用上下文中没有分片键，且策略要求拒绝
    #[error("shard key missing from call context")]
    MissingShardKey,

    /// 目录服务查询失败
    #[error("catalog query failed: {0}")]
    Catalog(String),

    /// 注册表文件解析失败
    #[error("failed to parse `{path}`: {reason}")]
    Parse { path: String, reason: String },

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 文件监听失败
    #[error("watch error: {0}")]
    Watch(String),

    /// 目标地址非法
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// 未注册的 resolver scheme
    #[error("no resolver registered for scheme `{0}`")]
    UnknownScheme(String),

    /// 未注册的负载均衡策略
    #[error("no balancer registered under policy `{0}`")]
    UnknownPolicy(String),

    /// 地址接收方已关闭
    #[error("address sink closed")]
    SinkClosed,

    /// 建立连接失败
    #[error("failed to connect to `{address}`: {reason}")]
    Connect { address: String, reason: String },

    /// 后端不支持该操作
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl RoutingError {
    /// 创建目录查询错误
    pub fn catalog(reason: impl std::fmt::Display) -> Self {
        RoutingError::Catalog(reason.to_string())
    }

    /// 创建解析错误
    pub fn parse(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RoutingError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// 创建配置错误
    pub fn config(reason: impl std::fmt::Display) -> Self {
        RoutingError::Config(reason.to_string())
    }

    /// 错误所属类别
    pub fn code(&self) -> ErrorCode {
        match self {
            RoutingError::NoConnectionAvailable
            | RoutingError::Catalog(_)
            | RoutingError::SinkClosed
            | RoutingError::Connect { .. } => ErrorCode::TemporaryUnavailable,
            RoutingError::RingInconsistent { .. }
            | RoutingError::Io(_)
            | RoutingError::Watch(_) => ErrorCode::InternalError,
            RoutingError::MissingShardKey
            | RoutingError::Parse { .. }
            | RoutingError::InvalidTarget(_)
            | RoutingError::Config(_) => ErrorCode::InvalidInput,
            RoutingError::UnknownScheme(_) | RoutingError::UnknownPolicy(_) => ErrorCode::NotFound,
            RoutingError::NotSupported(_) => ErrorCode::NotAllowed,
        }
    }
}

/// 路由层结果类型
pub type Result<T> = std::result::Result<T, RoutingError>;
