//! Service façade for one SCN middleware session.
//!
//! A session negotiates its ports with the middleware's rendezvous server,
//! keeps an RPC client on the tx port and an RPC server on the rx port, and
//! forwards each operation as a single remote call.
//!
//! Every operation except [`ScnManager::join_service`] requires a joined
//! service and fails with [`ScnError::NotJoined`] otherwise.

mod builder;
mod types;

pub use builder::ScnManagerBuilder;
pub use types::{ChannelInfo, DsnDescription};

use crate::piax::{PiaxAccessor, SpatialQuery};
use crate::publisher::{DataListener, MessageListener, Publisher};
use crate::rpc::protocol::{as_opt_string, to_json, to_msgpack};
use crate::rpc::{RpcClient, RpcServerHandle};
use crate::shutdown::ShutdownHandle;
use crate::size::calc_size;
use crate::{Result, ScnError};
use rmpv::Value;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Connection state shared by [`ScnManager`] and its [`ShutdownHandle`]s.
pub(crate) struct Session {
    client: RpcClient,
    publisher: Arc<Publisher>,
    server: Mutex<Option<RpcServerHandle>>,
    /// Identifier exactly as returned by `join_service`
    service_id: RwLock<Option<Value>>,
    tx_port: u16,
    rx_port: u16,
    finalized: AtomicBool,
}

impl Session {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.client.call(method, params).await.map_err(|e| {
            debug!("{} failed. {}", method, e);
            e
        })
    }

    async fn require_joined(&self) -> Result<Value> {
        self.service_id
            .read()
            .await
            .clone()
            .ok_or(ScnError::NotJoined)
    }

    async fn leave_service(&self) -> Result<()> {
        let service_id = self.require_joined().await?;

        self.call("leave_service", vec![service_id.clone()]).await?;
        *self.service_id.write().await = None;

        debug!("service ID(={}) was left successfully.", service_id);
        Ok(())
    }

    /// Leave, then stop the listener. Both steps always run; failures are logged.
    pub(crate) async fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.leave_service().await {
            debug!("leave on finalize failed: {}", e);
        }

        match self.server.lock().await.take() {
            Some(mut server) => {
                server.shutdown();
                debug!("RPC receive server stopped. (RPC RX port = {})", self.rx_port);
            }
            None => debug!("RPC receive server was not running"),
        }
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }
}

/// Client of the SCN middleware.
pub struct ScnManager {
    session: Arc<Session>,
    piax: PiaxAccessor,
}

impl ScnManager {
    /// Create a builder with the default configuration.
    pub fn builder() -> ScnManagerBuilder {
        ScnManagerBuilder::new()
    }

    /// Connect with the default configuration.
    pub async fn connect() -> Result<(Self, ShutdownHandle)> {
        Self::builder().connect().await
    }

    fn from_parts(
        client: RpcClient,
        publisher: Arc<Publisher>,
        server: RpcServerHandle,
        tx_port: u16,
        rx_port: u16,
        piax: PiaxAccessor,
    ) -> (Self, ShutdownHandle) {
        let session = Arc::new(Session {
            client,
            publisher,
            server: Mutex::new(Some(server)),
            service_id: RwLock::new(None),
            tx_port,
            rx_port,
            finalized: AtomicBool::new(false),
        });
        let handle = ShutdownHandle::new(session.clone());
        (Self { session, piax }, handle)
    }

    // ========================================
    // Session state
    // ========================================

    /// Port of the middleware's API server.
    pub fn tx_port(&self) -> u16 {
        self.session.tx_port
    }

    /// Port the inbound RPC server listens on.
    pub fn rx_port(&self) -> u16 {
        self.session.rx_port
    }

    /// Current service identifier, rendered as text.
    pub async fn service_id(&self) -> Option<String> {
        self.session
            .service_id
            .read()
            .await
            .as_ref()
            .and_then(as_opt_string)
    }

    pub async fn is_joined(&self) -> bool {
        self.session.service_id.read().await.is_some()
    }

    /// Address of the inbound RPC server while it runs.
    pub async fn listener_addr(&self) -> Option<SocketAddr> {
        self.session.server.lock().await.as_ref().map(|s| s.addr())
    }

    /// Listener registry of the inbound RPC server.
    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.session.publisher
    }

    /// A new handle that finalizes this session.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.session.clone())
    }

    /// Set (or clear) the handler for bulk data.
    pub async fn set_data_listener(&self, listener: Option<Arc<dyn DataListener>>) {
        self.session.publisher.set_data_listener(listener).await;
    }

    // ========================================
    // Service operations
    // ========================================

    /// Join the middleware as `service_name`. Returns the service ID.
    pub async fn join_service(
        &self,
        service_name: &str,
        service_info: &serde_json::Value,
    ) -> Result<String> {
        let result = self
            .session
            .call(
                "join_service",
                vec![
                    Value::from(service_name),
                    to_msgpack(service_info)?,
                    Value::from(self.session.rx_port),
                ],
            )
            .await?;

        if result.is_nil() {
            return Err(ScnError::decode("join_service returned no service ID"));
        }
        let service_id = as_opt_string(&result).unwrap_or_default();
        *self.session.service_id.write().await = Some(result);

        debug!(
            "service name(={}) was joined successfully. (service ID ={})",
            service_name, service_id
        );
        Ok(service_id)
    }

    /// Replace the service information of the joined service.
    pub async fn update_service(&self, service_info: &serde_json::Value) -> Result<()> {
        let service_id = self.session.require_joined().await?;

        self.session
            .call("update_service", vec![service_id.clone(), to_msgpack(service_info)?])
            .await?;

        debug!(
            "service ID(={}) was updated successfully. (info = {})",
            service_id, service_info
        );
        Ok(())
    }

    /// Search services matching `query`.
    pub async fn discovery_service(&self, query: &serde_json::Value) -> Result<Vec<serde_json::Value>> {
        self.discover(query, None).await
    }

    /// Search services matching `query`, asking for at most `require` hits.
    pub async fn discovery_service_with_limit(
        &self,
        query: &serde_json::Value,
        require: u32,
    ) -> Result<Vec<serde_json::Value>> {
        self.discover(query, Some(require)).await
    }

    async fn discover(
        &self,
        query: &serde_json::Value,
        require: Option<u32>,
    ) -> Result<Vec<serde_json::Value>> {
        self.session.require_joined().await?;

        let mut params = vec![to_msgpack(query)?];
        if let Some(require) = require {
            params.push(Value::from(require));
        }
        let result = self.session.call("discovery_service", params).await?;
        let services: Vec<serde_json::Value> = decode_json("discovery_service", &result)?;

        debug!(
            "service discovery was executed successfully. ({} hits)",
            services.len()
        );
        Ok(services)
    }

    /// Leave the middleware. The service ID is cleared on success.
    pub async fn leave_service(&self) -> Result<()> {
        self.session.leave_service().await
    }

    /// Send `data` through the middleware.
    ///
    /// With `channel_id` the data goes to that channel only. With `sync` the
    /// call returns once transmission has completed. Returns the IDs of the
    /// channels the data was sent on.
    pub async fn send_data(
        &self,
        data: &serde_json::Value,
        channel_id: Option<&str>,
        sync: bool,
    ) -> Result<Vec<String>> {
        let service_id = self.session.require_joined().await?;
        let data_size = calc_size(data);

        let result = self
            .session
            .call(
                "send_data",
                vec![
                    service_id,
                    to_msgpack(data)?,
                    Value::from(data_size),
                    channel_id.map(Value::from).unwrap_or(Value::Nil),
                    Value::from(sync),
                ],
            )
            .await?;
        let channel_ids: Vec<String> = decode_json("send_data", &result)?;

        debug!(
            "data({} bytes) has been sent successfully. (channel ID = {:?}, sync = {})",
            data_size, channel_ids, sync
        );
        Ok(channel_ids)
    }

    /// Generate the DSN description for `table_name` from an event data model.
    pub async fn create_dsn(
        &self,
        table_name: &str,
        event_data_model: &serde_json::Value,
    ) -> Result<DsnDescription> {
        self.session.require_joined().await?;

        let result = self
            .session
            .call(
                "create_dsn",
                vec![Value::from(table_name), to_msgpack(event_data_model)?],
            )
            .await?;

        let (overlay_name, description) = match result.as_array().map(|a| a.as_slice()) {
            Some([name, desc]) => (as_opt_string(name), as_opt_string(desc)),
            _ => (None, None),
        };
        let (overlay_name, description) = overlay_name.zip(description).ok_or_else(|| {
            ScnError::decode(format!("create_dsn returned an unexpected value: {}", result))
        })?;

        debug!("DSN for overlay {} was created successfully.", overlay_name);
        Ok(DsnDescription {
            overlay_name,
            description,
        })
    }

    /// Create an overlay from a DSN description.
    ///
    /// `listener` receives the overlay's messages until the overlay is deleted.
    pub async fn create_overlay(
        &self,
        overlay_name: &str,
        dsn_desc: &str,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Result<String> {
        self.session.require_joined().await?;

        let result = self
            .session
            .call(
                "create_overlay",
                vec![
                    Value::from(overlay_name),
                    Value::from(dsn_desc),
                    Value::from(self.session.rx_port),
                ],
            )
            .await?;
        let overlay_id = as_opt_string(&result)
            .ok_or_else(|| ScnError::decode("create_overlay returned no overlay ID"))?;

        if let Some(listener) = listener {
            self.session
                .publisher
                .add_overlay_listener(overlay_id.clone(), listener)
                .await;
        }

        debug!(
            "overlay name(={}) was created successfully. (overlay id = {})",
            overlay_name, overlay_id
        );
        Ok(overlay_id)
    }

    /// Replace the DSN description of an existing overlay.
    pub async fn modify_overlay(
        &self,
        overlay_name: &str,
        overlay_id: &str,
        dsn_desc: &str,
    ) -> Result<()> {
        self.session.require_joined().await?;

        self.session
            .call(
                "modify_overlay",
                vec![
                    Value::from(overlay_name),
                    Value::from(overlay_id),
                    Value::from(dsn_desc),
                ],
            )
            .await?;

        debug!("overlay id(={}) was modified successfully.", overlay_id);
        Ok(())
    }

    /// Delete an overlay. Its listener is removed even if the call fails.
    pub async fn delete_overlay(&self, overlay_id: &str) -> Result<()> {
        let result = async {
            self.session.require_joined().await?;
            self.session
                .call("delete_overlay", vec![Value::from(overlay_id)])
                .await
        }
        .await;

        self.session.publisher.remove_overlay_listener(overlay_id).await;

        result?;
        debug!("overlay id(={}) was deleted successfully.", overlay_id);
        Ok(())
    }

    /// Look up a channel.
    pub async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.session.require_joined().await?;

        let result = self
            .session
            .call("get_channel", vec![Value::from(channel_id)])
            .await?;
        decode_json("get_channel", &result)
    }

    /// Leave and stop the inbound listener. See [`ShutdownHandle::finalize`].
    pub async fn finalize(&self) {
        self.session.finalize().await
    }

    // ========================================
    // PIAX
    // ========================================

    /// Fetch PIAX sensor values. See [`PiaxAccessor::get_data`].
    pub async fn get_piax_data<S: AsRef<str>>(
        &self,
        values: &[S],
        query: &SpatialQuery,
    ) -> Result<String> {
        self.piax.get_data(values, query).await
    }

    /// Fetch PIAX sensors. See [`PiaxAccessor::get_sensors`].
    pub async fn get_piax_sensors(&self, query: &SpatialQuery) -> Result<String> {
        self.piax.get_sensors(query).await
    }

    pub fn piax(&self) -> &PiaxAccessor {
        &self.piax
    }
}

impl std::fmt::Debug for ScnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScnManager")
            .field("tx_port", &self.session.tx_port)
            .field("rx_port", &self.session.rx_port)
            .field("peer", &self.session.client.addr())
            .finish()
    }
}

/// Decode a JSON text result. Structured results are accepted as is.
fn decode_json<T: DeserializeOwned>(method: &str, value: &Value) -> Result<T> {
    let decoded = match value {
        Value::String(s) => serde_json::from_slice(s.as_bytes()),
        Value::Binary(b) => serde_json::from_slice(b),
        other => serde_json::from_value(to_json(other)),
    };
    decoded.map_err(|e| ScnError::decode(format!("{} returned invalid JSON: {}", method, e)))
}
