//! gRPC 错误转换
//!
//! 挑选连接失败时，调用方拿到的是 `tonic::Status`

use super::{ErrorCode, RoutingError};
use tonic::Status;

impl From<RoutingError> for Status {
    fn from(err: RoutingError) -> Self {
        let message = err.to_string();
        match err {
            RoutingError::NoConnectionAvailable => Status::unavailable(message),
            RoutingError::RingInconsistent { .. } => Status::internal(message),
            RoutingError::MissingShardKey | RoutingError::InvalidTarget(_) => {
                Status::invalid_argument(message)
            }
            other => match other.code() {
                ErrorCode::InvalidInput => Status::invalid_argument(message),
                ErrorCode::NotAllowed => Status::unimplemented(message),
                ErrorCode::NotFound => Status::not_found(message),
                ErrorCode::TemporaryUnavailable => Status::unavailable(message),
                ErrorCode::InternalError => Status::internal(message),
            },
        }
    }
}
