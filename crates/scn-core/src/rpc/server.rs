//! MessagePack-RPC server for inbound middleware callbacks.
//!
//! Accepts connections on the session's rx port. Each connection is handled
//! in its own spawned task; requests and notifications are passed to an
//! [`RpcDispatch`] implementation and requests are answered in order.

use super::protocol::{write_message, MessageReader, RpcMessage};
use crate::config::RpcConfig;
use crate::{Result, ScnError};
use rmpv::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running RPC server. Dropping shuts down the server.
pub struct RpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns true until [`shutdown`](Self::shutdown) has been called.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Stop accepting connections and close active ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RpcServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServerHandle")
            .field("addr", &self.addr)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Dispatches inbound RPC calls.
#[async_trait::async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    /// Handle `method` and return its result.
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

/// RPC server bound to a local address.
pub struct RpcServer;

impl RpcServer {
    /// Start the server with the default message size limit.
    pub async fn start<D: RpcDispatch>(addr: SocketAddr, dispatch: Arc<D>) -> Result<RpcServerHandle> {
        Self::start_with(addr, dispatch, RpcConfig::MAX_MESSAGE_SIZE).await
    }

    /// Bind `addr` and serve in background tasks.
    pub async fn start_with<D: RpcDispatch>(
        addr: SocketAddr,
        dispatch: Arc<D>,
        max_message_size: usize,
    ) -> Result<RpcServerHandle> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ScnError::Transport {
            message: format!("failed to listen on {}: {}", addr, e),
            source: Some(e),
        })?;
        let addr = listener.local_addr()?;

        info!("RPC receive server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            max_message_size,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(RpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<D: RpcDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        max_message_size: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC receive server stopping");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= RpcConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting RPC connection from {}: at max capacity ({})",
                                    peer_addr,
                                    RpcConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let dispatch = dispatch.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("RPC connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &*dispatch, max_message_size, &mut conn_shutdown).await {
                                    debug!("RPC connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("RPC accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<D: RpcDispatch>(
        stream: TcpStream,
        dispatch: &D,
        max_message_size: usize,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = MessageReader::with_max_message_size(reader, max_message_size);

        loop {
            let message = tokio::select! {
                result = reader.next_message() => {
                    match result? {
                        Some(m) => m,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            match message {
                RpcMessage::Request {
                    msgid,
                    method,
                    params,
                } => {
                    let response = match dispatch.dispatch(&method, params).await {
                        Ok(result) => RpcMessage::success(msgid, result),
                        Err(e) => {
                            debug!("RPC {} failed: {}", method, e);
                            RpcMessage::error(msgid, remote_message(e))
                        }
                    };
                    write_message(&mut writer, response).await?;
                }
                RpcMessage::Notification { method, params } => {
                    if let Err(e) = dispatch.dispatch(&method, params).await {
                        debug!("RPC notification {} failed: {}", method, e);
                    }
                }
                RpcMessage::Response { msgid, .. } => {
                    warn!("Ignoring unsolicited RPC response {}", msgid);
                }
            }
        }
    }
}

fn remote_message(err: ScnError) -> String {
    match err {
        ScnError::Remote { message, .. } => message,
        other => other.to_string(),
    }
}
