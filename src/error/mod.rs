//! 错误处理模块
//!
//! 提供统一的错误类型、错误类别以及到 gRPC 状态码的转换

pub mod code;
pub mod grpc;
pub mod routing_error;

pub use code::ErrorCode;
pub use routing_error::{Result, RoutingError};
