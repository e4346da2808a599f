//! 实例集合差异计算
//!
//! 所有后端共用同一套比较规则：实例只按地址识别，没有"更新"事件。

use std::collections::HashSet;

use crate::registry::instance::{Instance, RegistryChange};

/// 计算同一服务新旧两组实例之间的变更
///
/// 先按旧集合顺序输出 `Deregistered`，再按新集合顺序输出 `Registered`。
/// 同一地址在任一侧重复出现时只产生一个事件。
pub fn diff(old: &[Instance], new: &[Instance]) -> Vec<RegistryChange> {
    let old_addrs: HashSet<&str> = old.iter().map(Instance::address).collect();
    let new_addrs: HashSet<&str> = new.iter().map(Instance::address).collect();

    let mut changes = Vec::new();
    let mut seen = HashSet::new();
    for instance in old {
        if !new_addrs.contains(instance.address()) && seen.insert(instance.address()) {
            changes.push(RegistryChange::deregistered(instance.clone()));
        }
    }

    seen.clear();
    for instance in new {
        if !old_addrs.contains(instance.address()) && seen.insert(instance.address()) {
            changes.push(RegistryChange::registered(instance.clone()));
        }
    }

    changes
}

/// 按地址去重，保留第一次出现的实例
pub fn dedup_by_address(instances: Vec<Instance>) -> Vec<Instance> {
    let mut seen = HashSet::new();
    instances
        .into_iter()
        .filter(|instance| seen.insert(instance.address().to_string()))
        .collect()
}
