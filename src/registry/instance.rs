//! 服务与实例定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 逻辑服务，仅由名称标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    name: String,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 服务实例
///
/// 一个实例由其所属服务和网络地址（`host:port`）唯一确定，构造后不可变。
/// 属性变化被视为一次注销加一次注册。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    service_name: String,
    address: String,
}

impl Instance {
    /// 创建新的服务实例
    pub fn new(service_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            address: address.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_name, self.address)
    }
}

/// 注册表变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// 实例加入服务
    Registered,
    /// 实例离开服务
    Deregistered,
}

/// 单个实例的一次成员变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryChange {
    pub instance: Instance,
    pub change_type: ChangeType,
}

impl RegistryChange {
    pub fn registered(instance: Instance) -> Self {
        Self {
            instance,
            change_type: ChangeType::Registered,
        }
    }

    pub fn deregistered(instance: Instance) -> Self {
        Self {
            instance,
            change_type: ChangeType::Deregistered,
        }
    }
}
