//! 注册表快照、差异计算与订阅语义测试

use flare_shard_discovery::registry::diff::{dedup_by_address, diff};
use flare_shard_discovery::registry::{ChangeType, Instance, RegistryChange, RegistryState};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

fn inst(addr: &str) -> Instance {
    Instance::new("svc", addr)
}

fn drain(rx: &mut mpsc::Receiver<RegistryChange>) -> Vec<(ChangeType, String)> {
    let mut events = Vec::new();
    while let Ok(change) = rx.try_recv() {
        events.push((change.change_type, change.instance.address().to_string()));
    }
    events
}

#[test]
fn test_diff_orders_deregistrations_first() {
    let old = vec![inst("a:1"), inst("b:1")];
    let new = vec![inst("b:1"), inst("c:1")];

    let changes = diff(&old, &new);
    assert_eq!(
        changes,
        vec![
            RegistryChange::deregistered(inst("a:1")),
            RegistryChange::registered(inst("c:1")),
        ]
    );
}

#[test]
fn test_diff_identical_sets_is_empty() {
    let set = vec![inst("a:1"), inst("b:1")];
    assert!(diff(&set, &set).is_empty());
    assert!(diff(&[], &[]).is_empty());
}

#[test]
fn test_diff_collapses_duplicates() {
    let new = vec![inst("a:1"), inst("a:1"), inst("b:1")];
    let changes = diff(&[], &new);
    assert_eq!(changes.len(), 2);

    assert_eq!(dedup_by_address(new).len(), 2);
}

proptest! {
    /// 对旧集合应用差异后得到新集合
    #[test]
    fn prop_diff_applied_to_old_yields_new(
        old in proptest::collection::vec(0u8..16, 0..12),
        new in proptest::collection::vec(0u8..16, 0..12),
    ) {
        let old: Vec<Instance> = old.iter().map(|n| inst(&format!("10.0.0.{}:80", n))).collect();
        let new: Vec<Instance> = new.iter().map(|n| inst(&format!("10.0.0.{}:80", n))).collect();

        let mut applied: HashSet<String> = old.iter().map(|i| i.address().to_string()).collect();
        let changes = diff(&old, &new);
        let mut seen_registration = false;
        for change in &changes {
            match change.change_type {
                ChangeType::Deregistered => {
                    prop_assert!(!seen_registration, "deregistrations must come first");
                    prop_assert!(applied.remove(change.instance.address()));
                }
                ChangeType::Registered => {
                    seen_registration = true;
                    prop_assert!(applied.insert(change.instance.address().to_string()));
                }
            }
        }

        let expected: HashSet<String> = new.iter().map(|i| i.address().to_string()).collect();
        prop_assert_eq!(applied, expected);
    }
}

#[tokio::test]
async fn test_subscribe_replays_current_members() {
    let state = Arc::new(RegistryState::new(8));
    state.commit("svc", vec![inst("a:1"), inst("b:1")]);

    let (mut rx, stop) = state.watch("svc");
    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            (ChangeType::Registered, "a:1".to_string()),
            (ChangeType::Registered, "b:1".to_string()),
        ]
    );
    stop.stop();
}

#[tokio::test]
async fn test_replay_larger_than_buffer_is_not_truncated() {
    let state = Arc::new(RegistryState::new(1));
    let members: Vec<Instance> = (0..5).map(|n| inst(&format!("h{}:1", n))).collect();
    state.commit("svc", members);

    let (mut rx, _stop) = state.watch("svc");
    assert_eq!(drain(&mut rx).len(), 5);
}

#[tokio::test]
async fn test_commit_broadcasts_to_every_watcher() {
    let state = Arc::new(RegistryState::new(8));
    let (mut rx1, _stop1) = state.watch("svc");
    let (mut rx2, _stop2) = state.watch("svc");

    let changes = state.commit("svc", vec![inst("a:1")]);
    assert_eq!(changes.len(), 1);

    assert_eq!(drain(&mut rx1), vec![(ChangeType::Registered, "a:1".to_string())]);
    assert_eq!(drain(&mut rx2), vec![(ChangeType::Registered, "a:1".to_string())]);
}

#[tokio::test]
async fn test_watchers_are_isolated_per_service() {
    let state = Arc::new(RegistryState::new(8));
    let (mut orders, _s1) = state.watch("orders");
    let (mut users, _s2) = state.watch("users");

    state.commit("orders", vec![Instance::new("orders", "o:1")]);

    assert_eq!(drain(&mut orders).len(), 1);
    assert!(drain(&mut users).is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_closes_channel() {
    let state = Arc::new(RegistryState::new(8));
    let (mut rx, stop) = state.watch("svc");
    assert_eq!(state.watcher_count("svc"), 1);

    stop.stop();
    stop.stop();
    assert!(stop.is_stopped());
    assert_eq!(state.watcher_count("svc"), 0);

    state.commit("svc", vec![inst("a:1")]);
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_full_channel_drops_events_without_blocking() {
    let state = Arc::new(RegistryState::new(1));
    let (mut rx, _stop) = state.watch("svc");

    state.commit("svc", vec![inst("a:1")]);
    state.commit("svc", vec![inst("a:1"), inst("b:1")]);
    state.commit("svc", vec![inst("a:1"), inst("b:1"), inst("c:1")]);

    // 只保留第一个事件，快照仍然是最新的
    assert_eq!(drain(&mut rx), vec![(ChangeType::Registered, "a:1".to_string())]);
    assert_eq!(state.instances("svc").len(), 3);
    assert_eq!(state.watcher_count("svc"), 1);
}

#[tokio::test]
async fn test_dropped_receiver_is_pruned_on_next_broadcast() {
    let state = Arc::new(RegistryState::new(8));
    let (rx, _stop) = state.watch("svc");
    drop(rx);
    assert_eq!(state.watcher_count("svc"), 1);

    state.commit("svc", vec![inst("a:1")]);
    assert_eq!(state.watcher_count("svc"), 0);
}

#[tokio::test]
async fn test_empty_commit_removes_service() {
    let state = RegistryState::default();
    state.commit("svc", vec![inst("a:1")]);
    assert_eq!(state.services(), vec!["svc".to_string()]);

    let changes = state.commit("svc", Vec::new());
    assert_eq!(changes, vec![RegistryChange::deregistered(inst("a:1"))]);
    assert!(state.services().is_empty());
    assert!(state.instances("svc").is_empty());
}

#[test]
fn test_readers_never_observe_partial_commit() {
    let state = Arc::new(RegistryState::new(8));
    let small: Vec<Instance> = (0..2).map(|n| inst(&format!("s{}:1", n))).collect();
    let large: Vec<Instance> = (0..50).map(|n| inst(&format!("l{}:1", n))).collect();
    state.commit("svc", small.clone());

    let writer = {
        let state = state.clone();
        let (small, large) = (small.clone(), large.clone());
        std::thread::spawn(move || {
            for round in 0..200 {
                let next = if round % 2 == 0 { large.clone() } else { small.clone() };
                state.commit("svc", next);
            }
        })
    };

    for _ in 0..2000 {
        let seen = state.instances("svc");
        assert!(seen == small || seen == large, "observed {} instances", seen.len());
    }
    writer.join().unwrap();
}

#[tokio::test]
async fn test_unsubscribing_one_watcher_keeps_sibling() {
    let state = Arc::new(RegistryState::new(8));
    let (mut b, _stop_b) = state.watch("svc");

    let (_a, stop_a) = state.watch("svc");
    stop_a.stop();
    assert_eq!(state.watcher_count("svc"), 1);

    state.commit("svc", vec![inst("a:1")]);
    assert_eq!(drain(&mut b), vec![(ChangeType::Registered, "a:1".to_string())]);
}
