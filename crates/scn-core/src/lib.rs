//! SCN Core - Client binding for the SCN pub/sub middleware.
//!
//! A program connects to the middleware running on the same host, joins it
//! as a named service, then publishes data, discovers other services and
//! exchanges messages on overlays. The middleware calls back into the
//! program for inbound data and messages, which are handed to registered
//! listeners on a bounded worker pool.
//!
//! The crate also contains a small HTTP accessor for the PIAX sensor data
//! service.
//!
//! # Example
//!
//! ```rust,ignore
//! use scn_core::{MessageEvent, ScnManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> scn_core::Result<()> {
//!     let (scn, shutdown) = ScnManager::connect().await?;
//!
//!     let service_id = scn.join_service("weather", &json!({"area": "kanto"})).await?;
//!     println!("Joined as {}", service_id);
//!
//!     let dsn = scn.create_dsn("observations", &json!({"temp": "float"})).await?;
//!     let overlay_id = scn
//!         .create_overlay(
//!             &dsn.overlay_name,
//!             &dsn.description,
//!             Some(Arc::new(|event: MessageEvent| println!("{}", event.message))),
//!         )
//!         .await?;
//!     println!("Created overlay {}", overlay_id);
//!
//!     scn_core::shutdown::finalize_on_signal(&[shutdown]).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod piax;
pub mod pool;
pub mod publisher;
pub mod rpc;
pub mod shutdown;
pub mod size;

// Re-export commonly used types
pub use error::{ErrorKind, Result, ScnError};
pub use manager::{ChannelInfo, DsnDescription, ScnManager, ScnManagerBuilder};
pub use piax::{PiaxAccessor, SpatialQuery};
pub use pool::CallbackPool;
pub use publisher::{DataEvent, DataListener, MessageEvent, MessageListener, Publisher};
pub use shutdown::ShutdownHandle;
pub use size::calc_size;
