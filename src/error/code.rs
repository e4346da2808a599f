//! 错误代码和错误类别定义
//!
//! 路由层只区分少量类别，调用方据此决定是否重试

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// - `InvalidInput`: 调用方输入非法（目标地址、配置等）
/// - `NotAllowed`: 后端不支持该操作
/// - `NotFound`: 找不到对应的插件或资源
/// - `TemporaryUnavailable`: 暂时不可用，可以稍后重试
/// - `InternalError`: 内部不变量被破坏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    InvalidInput = 1000,
    NotAllowed = 2000,
    NotFound = 3000,
    TemporaryUnavailable = 4000,
    InternalError = 5000,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotAllowed => "NOT_ALLOWED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::TemporaryUnavailable => "TEMPORARY_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::TemporaryUnavailable)
    }
}
