//! MessagePack-RPC transport used to talk to the SCN middleware.
//!
//! # Architecture
//!
//! - **Client**: one persistent connection to the middleware's tx port
//! - **Server**: listens on the session's rx port for inbound callbacks
//! - **Protocol**: message types, stream framing and value conversion shared by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::RpcMessage;
pub use server::{RpcDispatch, RpcServer, RpcServerHandle};
