//! Builder for configuring an SCN session.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;
use tracing::debug;

use super::ScnManager;
use crate::config::{DispatchConfig, RpcConfig};
use crate::piax::PiaxAccessor;
use crate::pool::CallbackPool;
use crate::publisher::{DataListener, Publisher};
use crate::rpc::{RpcClient, RpcServer};
use crate::shutdown::ShutdownHandle;
use crate::{Result, ScnError};

/// Builder for configuring an [`ScnManager`].
///
/// # Example
///
/// ```rust,ignore
/// use scn_core::ScnManager;
///
/// let (scn, shutdown) = ScnManager::builder()
///     .rendezvous_addr("127.0.0.1:10000".parse()?)
///     .call_timeout(Duration::from_secs(10))
///     .connect()
///     .await?;
/// ```
pub struct ScnManagerBuilder {
    rendezvous_addr: SocketAddr,
    tx_host: IpAddr,
    rx_bind_host: IpAddr,
    call_timeout: Duration,
    max_message_size: usize,
    workers: usize,
    queue_depth: usize,
    data_listener: Option<Arc<dyn DataListener>>,
    piax: Option<PiaxAccessor>,
}

impl ScnManagerBuilder {
    pub fn new() -> Self {
        Self {
            rendezvous_addr: RpcConfig::initial_addr(),
            tx_host: RpcConfig::TX_HOST,
            rx_bind_host: RpcConfig::RX_BIND_HOST,
            call_timeout: RpcConfig::CLIENT_TIMEOUT,
            max_message_size: RpcConfig::MAX_MESSAGE_SIZE,
            workers: DispatchConfig::WORKERS,
            queue_depth: DispatchConfig::QUEUE_DEPTH,
            data_listener: None,
            piax: None,
        }
    }

    /// Address of the middleware's rendezvous server.
    ///
    /// Default: `127.0.0.1:10000`
    pub fn rendezvous_addr(mut self, addr: SocketAddr) -> Self {
        self.rendezvous_addr = addr;
        self
    }

    /// Host of the middleware's API server (the tx port).
    pub fn tx_host(mut self, host: IpAddr) -> Self {
        self.tx_host = host;
        self
    }

    /// Address the inbound RPC server binds to.
    ///
    /// Default: `0.0.0.0`
    pub fn rx_bind_host(mut self, host: IpAddr) -> Self {
        self.rx_bind_host = host;
        self
    }

    /// Timeout of every outbound call, connection attempts included.
    ///
    /// Default: 40 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Largest accepted MessagePack message, in bytes.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Number of threads running listeners.
    pub fn callback_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Number of inbound events that may wait for a worker.
    pub fn callback_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Handler for bulk data, installed before the listener starts.
    pub fn data_listener(mut self, listener: Arc<dyn DataListener>) -> Self {
        self.data_listener = Some(listener);
        self
    }

    /// PIAX accessor to use instead of the default deployment.
    pub fn piax(mut self, piax: PiaxAccessor) -> Self {
        self.piax = Some(piax);
        self
    }

    /// Negotiate ports, connect to the API server and start the inbound listener.
    pub async fn connect(self) -> Result<(ScnManager, ShutdownHandle)> {
        let (tx_port, rx_port) = self.negotiate_ports().await?;

        let tx_addr = SocketAddr::new(self.tx_host, tx_port);
        let client = RpcClient::connect_with(tx_addr, self.call_timeout, self.max_message_size)
            .await
            .map_err(|e| connect_error(tx_addr, e))?;

        let publisher = Arc::new(Publisher::new(CallbackPool::new(
            self.workers,
            self.queue_depth,
        )));
        publisher.set_data_listener(self.data_listener).await;

        let rx_addr = SocketAddr::new(self.rx_bind_host, rx_port);
        let server =
            RpcServer::start_with(rx_addr, publisher.clone(), self.max_message_size).await?;

        debug!(
            "SCN session established. (RPC TX port = {}, RPC RX port = {})",
            tx_port, rx_port
        );

        let piax = match self.piax {
            Some(piax) => piax,
            None => PiaxAccessor::new()?,
        };

        Ok(ScnManager::from_parts(
            client, publisher, server, tx_port, rx_port, piax,
        ))
    }

    /// Ask the rendezvous server for the session's `[tx_port, rx_port]`.
    async fn negotiate_ports(&self) -> Result<(u16, u16)> {
        let addr = self.rendezvous_addr;
        let client = RpcClient::connect_with(addr, self.call_timeout, self.max_message_size)
            .await
            .map_err(|e| connect_error(addr, e))?;

        let result = client
            .call("connect_app", vec![])
            .await
            .map_err(|e| match e.kind() {
                crate::ErrorKind::Transport => connect_error(addr, e),
                _ => e,
            })?;

        let ports = match result.as_array().map(|a| a.as_slice()) {
            Some([tx, rx]) => port(tx).zip(port(rx)),
            _ => None,
        };
        let (tx_port, rx_port) = ports.ok_or_else(|| {
            ScnError::decode(format!("connect_app returned an unexpected value: {}", result))
        })?;

        debug!(
            "RPC TX port = {}, RPC RX port = {}",
            tx_port, rx_port
        );
        Ok((tx_port, rx_port))
    }
}

impl Default for ScnManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn port(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|p| u16::try_from(p).ok())
}

fn connect_error(addr: SocketAddr, err: ScnError) -> ScnError {
    let message = format!(
        "can't connect to RPC Server of SCN middleware. (IP address = {}, port = {}): {}",
        addr.ip(),
        addr.port(),
        err
    );
    match err {
        ScnError::Transport { source, .. } => ScnError::Transport { message, source },
        _ => ScnError::transport(message),
    }
}
