//! Integration tests for the service façade against a fake middleware.

mod support;

use rmpv::Value;
use scn_core::rpc::RpcClient;
use scn_core::{
    calc_size, DataEvent, ErrorKind, MessageEvent, PiaxAccessor, ScnError, ScnManager,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::{free_port, start_rendezvous, wait_until_closed, FakeMiddleware, LOCALHOST};
use tokio::sync::mpsc;

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_negotiates_ports() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;

    assert_eq!(scn.rx_port(), middleware.rx_port);
    assert_eq!(
        scn.listener_addr().await,
        Some(SocketAddr::new(LOCALHOST, middleware.rx_port))
    );
    assert!(!scn.is_joined().await);
    assert_eq!(scn.service_id().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_failure_is_transport_error() {
    let port = free_port();
    let result = ScnManager::builder()
        .rendezvous_addr(SocketAddr::new(LOCALHOST, port))
        .call_timeout(Duration::from_secs(2))
        .connect()
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains(&format!("port = {}", port)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_api_port_starts_no_listener() {
    let tx_port = free_port();
    let rx_port = free_port();
    let rendezvous = start_rendezvous(tx_port, rx_port).await;

    let result = ScnManager::builder()
        .rendezvous_addr(rendezvous.addr())
        .tx_host(LOCALHOST)
        .rx_bind_host(LOCALHOST)
        .call_timeout(Duration::from_secs(2))
        .piax(PiaxAccessor::with_base(format!("127.0.0.1:{}", free_port())).unwrap())
        .connect()
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains(&format!("port = {}", tx_port)));
    assert!(wait_until_closed(SocketAddr::new(LOCALHOST, rx_port)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operations_require_join() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    let info = json!({"area": "kanto"});

    assert!(scn.update_service(&info).await.unwrap_err().is_not_joined());
    assert!(scn.discovery_service(&info).await.unwrap_err().is_not_joined());
    assert!(scn.leave_service().await.unwrap_err().is_not_joined());
    assert!(scn.send_data(&info, None, false).await.unwrap_err().is_not_joined());
    assert!(scn.create_dsn("t", &info).await.unwrap_err().is_not_joined());
    assert!(scn.create_overlay("o", "d", None).await.unwrap_err().is_not_joined());
    assert!(scn.modify_overlay("o", "ov-1", "d").await.unwrap_err().is_not_joined());
    assert!(scn.delete_overlay("ov-1").await.unwrap_err().is_not_joined());
    assert!(scn.get_channel("ch-1").await.unwrap_err().is_not_joined());

    // Nothing reached the middleware
    assert_eq!(middleware.service.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_join_update_leave() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;

    let service_id = scn
        .join_service("weather", &json!({"area": "kanto"}))
        .await
        .unwrap();
    assert_eq!(service_id, "svc-0001");
    assert_eq!(scn.service_id().await.as_deref(), Some("svc-0001"));

    let joins = middleware.service.calls_to("join_service");
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0][0], Value::from("weather"));
    assert_eq!(
        joins[0][1],
        Value::Map(vec![(Value::from("area"), Value::from("kanto"))])
    );
    assert_eq!(joins[0][2], Value::from(middleware.rx_port));

    scn.update_service(&json!({"area": "kansai"})).await.unwrap();
    scn.leave_service().await.unwrap();
    assert!(!scn.is_joined().await);

    assert_eq!(
        middleware.service.calls_to("update_service")[0][0],
        Value::from("svc-0001")
    );
    assert_eq!(
        middleware.service.calls_to("leave_service")[0],
        vec![Value::from("svc-0001")]
    );

    // Left again before rejoining
    assert!(scn.leave_service().await.unwrap_err().is_not_joined());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_id_is_passed_back_unchanged() {
    let middleware = FakeMiddleware::start_with_join_id(Value::from(4242u64)).await;
    let (scn, _shutdown) = middleware.connect().await;

    let service_id = scn.join_service("counter", &json!({})).await.unwrap();
    assert_eq!(service_id, "4242");

    scn.send_data(&json!(1), None, false).await.unwrap();
    assert_eq!(
        middleware.service.calls_to("send_data")[0][0],
        Value::from(4242u64)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discovery_decodes_json_text() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    let services = scn
        .discovery_service(&json!({"name": "weather"}))
        .await
        .unwrap();
    assert_eq!(services, vec![json!({"name": "weather"}), json!({"name": "traffic"})]);

    scn.discovery_service_with_limit(&json!({}), 5).await.unwrap();

    let calls = middleware.service.calls_to("discovery_service");
    assert_eq!(calls[0].len(), 1);
    assert_eq!(calls[1], vec![Value::Map(vec![]), Value::from(5u32)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_data_reports_size() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    let data = json!({"temp": 21.5, "tags": ["a", "b"]});
    let channels = scn.send_data(&data, Some("ch-9"), true).await.unwrap();
    assert_eq!(channels, vec!["ch-1", "ch-2"]);

    let params = &middleware.service.calls_to("send_data")[0];
    assert_eq!(params.len(), 5);
    assert_eq!(params[2], Value::from(calc_size(&data)));
    assert_eq!(params[3], Value::from("ch-9"));
    assert_eq!(params[4], Value::from(true));

    scn.send_data(&data, None, false).await.unwrap();
    let params = &middleware.service.calls_to("send_data")[1];
    assert!(params[3].is_nil());
    assert_eq!(params[4], Value::from(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dsn_and_channel() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    let dsn = scn
        .create_dsn("observations", &json!({"temp": "float"}))
        .await
        .unwrap();
    assert_eq!(dsn.overlay_name, "observations-overlay");
    assert!(dsn.description.contains("event :observations"));

    let channel = scn.get_channel("ch-1").await.unwrap();
    assert_eq!(channel.id, json!("ch-1"));
    assert_eq!(channel.qos, json!({"rate": 1}));

    scn.modify_overlay("observations-overlay", "ov-1", "state do\nend")
        .await
        .unwrap();
    assert_eq!(
        middleware.service.calls_to("modify_overlay")[0],
        vec![
            Value::from("observations-overlay"),
            Value::from("ov-1"),
            Value::from("state do\nend"),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlay_messages_reach_matching_listener() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut overlays = Vec::new();
    for name in ["first", "second"] {
        let tx = tx.clone();
        let id = scn
            .create_overlay(
                name,
                "dsn",
                Some(Arc::new(move |event: MessageEvent| {
                    let _ = tx.send((name, event));
                })),
            )
            .await
            .unwrap();
        overlays.push(id);
    }
    assert_eq!(overlays, vec!["ov-1", "ov-2"]);
    assert_eq!(
        middleware.service.calls_to("create_overlay")[0][2],
        Value::from(middleware.rx_port)
    );

    let inbound = RpcClient::connect(middleware.rx_addr()).await.unwrap();
    let result = inbound
        .call(
            "receive_message",
            vec![Value::from("ov-2"), Value::from("hello")],
        )
        .await
        .unwrap();
    assert!(result.is_nil());

    let (listener, event) = recv(&mut rx).await.expect("listener should run");
    assert_eq!(listener, "second");
    assert_eq!(event.overlay_id, "ov-2");
    assert_eq!(event.message, json!("hello"));
    assert!(recv(&mut rx).await.is_none());

    // Deleting the overlay stops delivery
    scn.delete_overlay("ov-2").await.unwrap();
    assert!(!scn.publisher().has_overlay_listener("ov-2").await);

    let result = inbound
        .call(
            "receive_message",
            vec![Value::from("ov-2"), Value::from("late")],
        )
        .await
        .unwrap();
    assert!(result.is_nil());
    assert!(recv(&mut rx).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_overlay_removes_listener_on_failure() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    let id = scn
        .create_overlay("first", "dsn", Some(Arc::new(|_: MessageEvent| {})))
        .await
        .unwrap();
    middleware.service.fail("delete_overlay");

    let err = scn.delete_overlay(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(!scn.publisher().has_overlay_listener(&id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_data_listener_receives_inbound_data() {
    let middleware = FakeMiddleware::start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_scn, _shutdown) = middleware
        .builder()
        .data_listener(Arc::new(move |event: DataEvent| {
            let _ = tx.send(event);
        }))
        .connect()
        .await
        .unwrap();

    let inbound = RpcClient::connect(middleware.rx_addr()).await.unwrap();
    inbound
        .call(
            "receive_data",
            vec![
                Value::Array(vec![Value::from(1u64), Value::from(2u64)]),
                Value::from(6u64),
                Value::from("ch-1"),
            ],
        )
        .await
        .unwrap();

    let event = recv(&mut rx).await.expect("listener should run");
    assert_eq!(event.data, json!([1, 2]));
    assert_eq!(event.size, 6);
    assert_eq!(event.channel_id.as_deref(), Some("ch-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_error_is_surfaced() {
    let middleware = FakeMiddleware::start().await;
    let (scn, _shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();
    middleware.service.fail("update_service");

    let err = scn.update_service(&json!({})).await.unwrap_err();
    match err {
        ScnError::Remote { method, message } => {
            assert_eq!(method, "update_service");
            assert!(message.contains("rejected"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // The session is still joined
    assert!(scn.is_joined().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalize_leaves_and_stops_listener() {
    let middleware = FakeMiddleware::start().await;
    let (scn, shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();

    shutdown.finalize().await;
    assert!(shutdown.is_finalized());
    assert!(!scn.is_joined().await);
    assert_eq!(scn.listener_addr().await, None);
    assert!(wait_until_closed(middleware.rx_addr()).await);

    // Only the first call has an effect
    shutdown.finalize().await;
    scn.finalize().await;
    assert_eq!(middleware.service.calls_to("leave_service").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalize_stops_listener_when_leave_fails() {
    let middleware = FakeMiddleware::start().await;
    let (scn, shutdown) = middleware.connect().await;
    scn.join_service("weather", &json!({})).await.unwrap();
    middleware.service.fail("leave_service");

    let other = scn.shutdown_handle();
    other.finalize().await;

    assert!(shutdown.is_finalized());
    assert_eq!(middleware.service.calls_to("leave_service").len(), 1);
    assert_eq!(scn.listener_addr().await, None);
    assert!(wait_until_closed(middleware.rx_addr()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalize_without_join_stops_listener() {
    let middleware = FakeMiddleware::start().await;
    let (scn, shutdown) = middleware.connect().await;

    shutdown.finalize().await;

    assert_eq!(middleware.service.calls_to("leave_service").len(), 0);
    assert_eq!(scn.listener_addr().await, None);
    assert!(wait_until_closed(middleware.rx_addr()).await);
}
