//! Inbound event dispatch.
//!
//! The middleware calls back into the session's RPC server with
//! `receive_data(data, size, channel_id)` for bulk data and
//! `receive_message(overlay_id, message)` for overlay messages. The
//! [`Publisher`] looks up the registered listener and hands the event to the
//! [`CallbackPool`]; the RPC call is acknowledged as soon as the job is queued.

use crate::pool::CallbackPool;
use crate::rpc::protocol::{as_opt_string, to_json};
use crate::rpc::RpcDispatch;
use crate::{Result, ScnError};
use rmpv::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Bulk data delivered to the service.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub data: serde_json::Value,
    /// Size reported by the sender
    pub size: u64,
    pub channel_id: Option<String>,
}

/// Message delivered on an overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub overlay_id: String,
    pub message: serde_json::Value,
}

/// Handler for bulk data.
pub trait DataListener: Send + Sync + 'static {
    fn on_data(&self, event: DataEvent);
}

impl<F> DataListener for F
where
    F: Fn(DataEvent) + Send + Sync + 'static,
{
    fn on_data(&self, event: DataEvent) {
        self(event)
    }
}

/// Handler for overlay messages.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, event: MessageEvent);
}

impl<F> MessageListener for F
where
    F: Fn(MessageEvent) + Send + Sync + 'static,
{
    fn on_message(&self, event: MessageEvent) {
        self(event)
    }
}

/// Listener registry and inbound RPC dispatcher.
pub struct Publisher {
    data_listener: RwLock<Option<Arc<dyn DataListener>>>,
    overlay_listeners: RwLock<HashMap<String, Arc<dyn MessageListener>>>,
    pool: CallbackPool,
}

impl Publisher {
    pub fn new(pool: CallbackPool) -> Self {
        Self {
            data_listener: RwLock::new(None),
            overlay_listeners: RwLock::new(HashMap::new()),
            pool,
        }
    }

    /// Set (or clear) the handler for bulk data.
    pub async fn set_data_listener(&self, listener: Option<Arc<dyn DataListener>>) {
        *self.data_listener.write().await = listener;
    }

    /// Register the handler for messages on `overlay_id`, replacing any previous one.
    pub async fn add_overlay_listener(
        &self,
        overlay_id: impl Into<String>,
        listener: Arc<dyn MessageListener>,
    ) {
        self.overlay_listeners
            .write()
            .await
            .insert(overlay_id.into(), listener);
    }

    /// Remove the handler for `overlay_id`. Returns whether one was registered.
    pub async fn remove_overlay_listener(&self, overlay_id: &str) -> bool {
        self.overlay_listeners
            .write()
            .await
            .remove(overlay_id)
            .is_some()
    }

    pub async fn has_overlay_listener(&self, overlay_id: &str) -> bool {
        self.overlay_listeners.read().await.contains_key(overlay_id)
    }

    /// Route bulk data to the data handler.
    pub async fn receive_data(&self, event: DataEvent) -> Result<()> {
        debug!(
            "data({} bytes) has been received. (channel ID = {:?})",
            event.size, event.channel_id
        );

        let listener = self.data_listener.read().await.clone();
        match listener {
            Some(listener) => self.pool.submit(move || listener.on_data(event)).await,
            None => {
                debug!("No data listener registered, dropping data");
                Ok(())
            }
        }
    }

    /// Route an overlay message to the handler registered for its overlay.
    pub async fn receive_message(&self, event: MessageEvent) -> Result<()> {
        debug!(
            "message has been received. (overlay id = {}, message = {})",
            event.overlay_id, event.message
        );

        let listener = self
            .overlay_listeners
            .read()
            .await
            .get(&event.overlay_id)
            .cloned();
        match listener {
            Some(listener) => self.pool.submit(move || listener.on_message(event)).await,
            None => {
                debug!("No listener for overlay {}, dropping message", event.overlay_id);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl RpcDispatch for Publisher {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        match method {
            "receive_data" => {
                let event = DataEvent {
                    data: params.first().map(to_json).unwrap_or(serde_json::Value::Null),
                    size: params.get(1).and_then(|v| v.as_u64()).unwrap_or(0),
                    channel_id: params.get(2).and_then(as_opt_string),
                };
                self.receive_data(event).await?;
                Ok(Value::Nil)
            }
            "receive_message" => {
                let overlay_id = params.first().and_then(as_opt_string).ok_or_else(|| {
                    ScnError::Remote {
                        method: method.to_string(),
                        message: "ArgumentError: overlay id is required".to_string(),
                    }
                })?;
                let event = MessageEvent {
                    overlay_id,
                    message: params.get(1).map(to_json).unwrap_or(serde_json::Value::Null),
                };
                self.receive_message(event).await?;
                Ok(Value::Nil)
            }
            _ => Err(ScnError::Remote {
                method: method.to_string(),
                message: format!("NoMethodError: undefined method '{}'", method),
            }),
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("pool", &self.pool).finish()
    }
}
