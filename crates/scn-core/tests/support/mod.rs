//! In-process stand-in for the SCN middleware.
//!
//! Runs a rendezvous server answering `connect_app` and an API server that
//! records every call it receives.

#![allow(dead_code)]

use rmpv::Value;
use scn_core::rpc::{RpcDispatch, RpcServer, RpcServerHandle};
use scn_core::{PiaxAccessor, ScnError, ScnManager, ScnManagerBuilder, ShutdownHandle};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// A local port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

struct Rendezvous {
    tx_port: u16,
    rx_port: u16,
}

#[async_trait::async_trait]
impl RpcDispatch for Rendezvous {
    async fn dispatch(&self, method: &str, _params: Vec<Value>) -> scn_core::Result<Value> {
        match method {
            "connect_app" => Ok(Value::Array(vec![
                Value::from(self.tx_port),
                Value::from(self.rx_port),
            ])),
            _ => Err(ScnError::Remote {
                method: method.to_string(),
                message: format!("NoMethodError: undefined method '{}'", method),
            }),
        }
    }
}

/// Rendezvous server alone, answering `connect_app` with the given ports.
pub async fn start_rendezvous(tx_port: u16, rx_port: u16) -> RpcServerHandle {
    RpcServer::start(
        SocketAddr::new(LOCALHOST, 0),
        Arc::new(Rendezvous { tx_port, rx_port }),
    )
    .await
    .unwrap()
}

/// API server that records calls and answers like the middleware does.
pub struct FakeService {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    failing: Mutex<HashSet<String>>,
    join_id: Value,
    overlays: AtomicUsize,
}

impl FakeService {
    fn new(join_id: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            join_id,
            overlays: AtomicUsize::new(0),
        }
    }

    /// Make `method` answer with a remote error from now on.
    pub fn fail(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    /// Parameters of every call to `method`, in order.
    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl RpcDispatch for FakeService {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> scn_core::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        if self.failing.lock().unwrap().contains(method) {
            return Err(ScnError::Remote {
                method: method.to_string(),
                message: "RuntimeError: rejected".to_string(),
            });
        }

        match method {
            "join_service" => Ok(self.join_id.clone()),
            "update_service" | "leave_service" | "modify_overlay" | "delete_overlay" => {
                Ok(Value::Nil)
            }
            "discovery_service" => Ok(Value::from(r#"[{"name": "weather"}, {"name": "traffic"}]"#)),
            "send_data" => Ok(Value::from(r#"["ch-1", "ch-2"]"#)),
            "create_dsn" => Ok(Value::Array(vec![
                Value::from("observations-overlay"),
                Value::from("state do\n  event :observations\nend"),
            ])),
            "create_overlay" => {
                let n = self.overlays.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Value::from(format!("ov-{}", n)))
            }
            "get_channel" => Ok(Value::from(
                r#"{"id": "ch-1", "channel": {"src": "svc-a"}, "scratch": {}, "qos": {"rate": 1}}"#,
            )),
            _ => Err(ScnError::Remote {
                method: method.to_string(),
                message: format!("NoMethodError: undefined method '{}'", method),
            }),
        }
    }
}

/// Rendezvous plus API server on ephemeral local ports.
pub struct FakeMiddleware {
    pub service: Arc<FakeService>,
    pub rx_port: u16,
    rendezvous: RpcServerHandle,
    api: RpcServerHandle,
}

impl FakeMiddleware {
    pub async fn start() -> Self {
        Self::start_with_join_id(Value::from("svc-0001")).await
    }

    pub async fn start_with_join_id(join_id: Value) -> Self {
        let service = Arc::new(FakeService::new(join_id));
        let api = RpcServer::start(SocketAddr::new(LOCALHOST, 0), service.clone())
            .await
            .unwrap();

        let rx_port = free_port();
        let rendezvous = start_rendezvous(api.addr().port(), rx_port).await;

        Self {
            service,
            rx_port,
            rendezvous,
            api,
        }
    }

    pub fn rendezvous_addr(&self) -> SocketAddr {
        self.rendezvous.addr()
    }

    pub fn builder(&self) -> ScnManagerBuilder {
        ScnManager::builder()
            .rendezvous_addr(self.rendezvous.addr())
            .tx_host(LOCALHOST)
            .rx_bind_host(LOCALHOST)
            .call_timeout(Duration::from_secs(5))
            .piax(PiaxAccessor::with_base(format!("127.0.0.1:{}", free_port())).unwrap())
    }

    pub async fn connect(&self) -> (ScnManager, ShutdownHandle) {
        self.builder().connect().await.unwrap()
    }

    /// Address the session's inbound listener should be on.
    pub fn rx_addr(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.rx_port)
    }
}

/// Wait until nothing accepts connections on `addr`.
pub async fn wait_until_closed(addr: SocketAddr) -> bool {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
