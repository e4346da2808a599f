//! 目录服务后端

#[cfg(feature = "consul")]
pub mod consul;
