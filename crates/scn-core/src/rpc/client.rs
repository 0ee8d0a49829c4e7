//! MessagePack-RPC client.
//!
//! Holds one persistent TCP connection and serializes calls over it with a
//! tokio `Mutex`, so the client can be shared between tasks.

use super::protocol::{encode_message, MessageReader, RpcMessage};
use crate::config::RpcConfig;
use crate::{Result, ScnError};
use rmpv::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// RPC client connected to a single peer.
#[derive(Debug)]
pub struct RpcClient {
    /// Held for the whole call, so calls are answered in order
    reader: Mutex<MessageReader<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    addr: SocketAddr,
    next_id: AtomicU32,
    timeout: Duration,
}

impl RpcClient {
    /// Connect with the default timeout and message size limit.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with(addr, RpcConfig::CLIENT_TIMEOUT, RpcConfig::MAX_MESSAGE_SIZE).await
    }

    /// Connect to `addr`.
    ///
    /// `timeout` bounds the connection attempt and every later call.
    pub async fn connect_with(
        addr: SocketAddr,
        timeout: Duration,
        max_message_size: usize,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ScnError::Timeout {
                method: "connect".to_string(),
                after: timeout,
            })?
            .map_err(|e| ScnError::Transport {
                message: format!("failed to connect to {}: {}", addr, e),
                source: Some(e),
            })?;
        stream.set_nodelay(true)?;

        debug!("RPC client connected to {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(MessageReader::with_max_message_size(reader, max_message_size)),
            writer: Arc::new(Mutex::new(writer)),
            addr,
            next_id: AtomicU32::new(0),
            timeout,
        })
    }

    /// Call `method` with positional `params` and wait for its result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        tokio::time::timeout(self.timeout, self.call_inner(method, params))
            .await
            .map_err(|_| ScnError::Timeout {
                method: method.to_string(),
                after: self.timeout,
            })?
    }

    async fn call_inner(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let msgid = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_message(RpcMessage::request(msgid, method, params))?;
        let mut reader = self.reader.lock().await;

        // The write runs in its own task so a timed-out call never leaves a
        // partial frame on the stream.
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await
        .map_err(|e| ScnError::transport(format!("RPC write task failed: {}", e)))??;

        loop {
            let message = reader.next_message().await?.ok_or_else(|| {
                ScnError::transport(format!("connection to {} closed during {}", self.addr, method))
            })?;

            match message {
                RpcMessage::Response {
                    msgid: id,
                    error,
                    result,
                } if id == msgid => {
                    if error.is_nil() {
                        return Ok(result);
                    }
                    return Err(ScnError::Remote {
                        method: method.to_string(),
                        message: describe_error(&error, &result),
                    });
                }
                RpcMessage::Response { msgid: id, .. } => {
                    // Answer to an earlier call that timed out.
                    debug!("Skipping stale RPC response {} (waiting for {})", id, msgid);
                }
                other => {
                    warn!("Unexpected message from {} during {}: {:?}", self.addr, method, other);
                }
            }
        }
    }

    /// Get the peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Render a remote error, appending the result when it carries detail.
fn describe_error(error: &Value, result: &Value) -> String {
    let error = match error.as_str() {
        Some(s) => s.to_string(),
        None => error.to_string(),
    };
    match result {
        Value::Nil => error,
        Value::String(s) => format!("{} ({})", error, String::from_utf8_lossy(s.as_bytes())),
        other => format!("{} ({})", error, other),
    }
}
