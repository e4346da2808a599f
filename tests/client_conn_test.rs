//! 客户端连接表与 tonic 通道适配测试

use flare_shard_discovery::balancer::{PickInfo, ShardKey, ShardOptions, ShardPickerBuilder};
use flare_shard_discovery::channel::{ClientConn, Connector, ShardChannel, TonicConnector};
use flare_shard_discovery::resolver::{Address, AddressSink, ResolverState};
use flare_shard_discovery::{Result, RoutingError};
use http::{Extensions, HeaderMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::{Service, ServiceExt};

fn state(addrs: &[&str]) -> ResolverState {
    ResolverState {
        addresses: addrs.iter().map(|a| Address::new(*a, "orders")).collect(),
    }
}

/// 连接即地址；地址以 `bad` 开头时连接失败
fn string_conn(connects: Arc<AtomicUsize>) -> ClientConn<String> {
    let connector = move |address: &Address| -> Result<String> {
        if address.addr.starts_with("bad") {
            return Err(RoutingError::Connect {
                address: address.addr.clone(),
                reason: "refused".to_string(),
            });
        }
        connects.fetch_add(1, Ordering::SeqCst);
        Ok(address.addr.clone())
    };
    ClientConn::new(
        Arc::new(connector),
        Box::new(ShardPickerBuilder::new(ShardOptions::default())),
    )
}

fn pick(conn: &ClientConn<String>, key: &str) -> Result<String> {
    let headers = HeaderMap::new();
    let mut extensions = Extensions::new();
    extensions.insert(ShardKey::new(key));
    conn.pick(&PickInfo::new("/orders.Orders/Get", &headers, &extensions))
}

#[test]
fn test_ready_set_follows_resolver_state() {
    let connects = Arc::new(AtomicUsize::new(0));
    let conn = string_conn(connects.clone());

    conn.update_state(state(&["b:1", "a:1"])).unwrap();
    assert_eq!(conn.ready_addresses(), vec!["a:1", "b:1"]);

    conn.update_state(state(&["b:1", "c:1"])).unwrap();
    assert_eq!(conn.ready_addresses(), vec!["b:1", "c:1"]);
    // b:1 的连接被复用
    assert_eq!(connects.load(Ordering::SeqCst), 3);

    let picked = pick(&conn, "user-42").unwrap();
    assert!(picked == "b:1" || picked == "c:1");
}

#[test]
fn test_empty_state_fails_picks() {
    let conn = string_conn(Arc::new(AtomicUsize::new(0)));
    assert!(matches!(pick(&conn, "k"), Err(RoutingError::NoConnectionAvailable)));

    conn.update_state(state(&[])).unwrap();
    assert!(matches!(pick(&conn, "k"), Err(RoutingError::NoConnectionAvailable)));

    conn.update_state(state(&["a:1"])).unwrap();
    conn.update_state(state(&[])).unwrap();
    assert!(matches!(pick(&conn, "k"), Err(RoutingError::NoConnectionAvailable)));
}

#[test]
fn test_connector_failure_skips_address() {
    let conn = string_conn(Arc::new(AtomicUsize::new(0)));
    conn.update_state(state(&["a:1", "bad:1"])).unwrap();

    assert_eq!(conn.ready_addresses(), vec!["a:1"]);
    for key in ["k1", "k2", "k3", "k4"] {
        assert_eq!(pick(&conn, key).unwrap(), "a:1");
    }
}

#[test]
fn test_unready_connection_leaves_ring() {
    let conn = string_conn(Arc::new(AtomicUsize::new(0)));
    conn.update_state(state(&["a:1", "b:1"])).unwrap();

    conn.mark_unready("a:1");
    assert_eq!(conn.ready_addresses(), vec!["b:1"]);
    for n in 0..20 {
        assert_eq!(pick(&conn, &format!("user-{}", n)).unwrap(), "b:1");
    }

    conn.mark_ready("a:1");
    assert_eq!(conn.ready_addresses(), vec!["a:1", "b:1"]);

    // 未知地址忽略
    conn.mark_unready("z:1");
    assert_eq!(conn.ready_addresses().len(), 2);
}

#[test]
fn test_closed_conn_rejects_updates() {
    let conn = string_conn(Arc::new(AtomicUsize::new(0)));
    conn.update_state(state(&["a:1"])).unwrap();

    conn.close();
    conn.close();
    assert!(matches!(conn.update_state(state(&["a:1"])), Err(RoutingError::SinkClosed)));
    assert!(conn.ready_addresses().is_empty());
    assert!(matches!(pick(&conn, "k"), Err(RoutingError::NoConnectionAvailable)));
}

#[tokio::test]
async fn test_tonic_connector_is_lazy() {
    let connector = TonicConnector::new();
    // 没有任何服务在监听，惰性连接仍然创建成功
    assert!(connector.connect(&Address::new("127.0.0.1:1", "orders")).is_ok());

    let result = connector.connect(&Address::new("bad host:1", "orders"));
    assert!(matches!(result, Err(RoutingError::Connect { .. })));
}

#[tokio::test]
async fn test_shard_channel_without_connections_is_unavailable() {
    let conn = Arc::new(ClientConn::new(
        Arc::new(TonicConnector::new()),
        Box::new(ShardPickerBuilder::new(ShardOptions::default())),
    ));
    let channel = ShardChannel::new(conn);

    let request = http::Request::builder()
        .uri("/orders.Orders/Get")
        .body(tonic::body::Body::empty())
        .unwrap();
    let err = match channel.oneshot(request).await {
        Ok(_) => panic!("request routed without any connection"),
        Err(err) => err,
    };
    let status = err.downcast::<tonic::Status>().unwrap();
    assert_eq!(status.code(), tonic::Code::Unavailable);
}

#[tokio::test]
async fn test_shard_channel_is_always_ready() {
    let conn = Arc::new(ClientConn::new(
        Arc::new(TonicConnector::new()),
        Box::new(ShardPickerBuilder::new(ShardOptions::default())),
    ));
    let mut channel = ShardChannel::new(conn);

    // 就绪判断推迟到 pick
    let mut task = tokio_test::task::spawn(());
    task.enter(|cx, _| tokio_test::assert_ready_ok!(channel.poll_ready(cx)));
}
