//! Centralized configuration for the SCN client.
//!
//! Defaults for the RPC transport, the inbound callback pool and the PIAX
//! data service. Everything here can be overridden per session through
//! [`crate::ScnManagerBuilder`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// RPC transport configuration.
pub struct RpcConfig;

impl RpcConfig {
    /// Host of the middleware's rendezvous server (`connect_app`).
    pub const INITIAL_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    pub const INITIAL_PORT: u16 = 10000;

    /// Host the session's RPC client connects to once ports are negotiated.
    pub const TX_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Address the inbound RPC server binds to.
    pub const RX_BIND_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Timeout applied to every outbound call, including connection setup.
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(40);

    /// Largest single message accepted from a stream (3 GiB).
    pub const MAX_MESSAGE_SIZE: usize = 3 * 1024 * 1024 * 1024;

    /// Read chunk size for stream buffers.
    pub const READ_CHUNK_SIZE: usize = 64 * 1024;

    /// Maximum concurrent inbound connections.
    pub const MAX_CONNECTIONS: usize = 64;

    /// Default rendezvous address (`127.0.0.1:10000`).
    pub fn initial_addr() -> SocketAddr {
        SocketAddr::new(Self::INITIAL_HOST, Self::INITIAL_PORT)
    }
}

/// Inbound callback pool configuration.
pub struct DispatchConfig;

impl DispatchConfig {
    pub const WORKERS: usize = 4;
    pub const QUEUE_DEPTH: usize = 256;
}

/// PIAX sensor data service configuration.
pub struct PiaxConfig;

impl PiaxConfig {
    pub const BASE: &'static str = "192.168.240.12:8090";
    pub const API_KEY: &'static str =
        "vqF+WleHlo094F2U5YhHlVhFo5J12u4Q86z2CR6COFOO7VTKgGKoMsv1YXsk7X4P3vnxl32mKEg=";
    pub const ACCEPT: &'static str = "application/json";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Field paths selected on every data query.
    pub const SELECT_COMMON: [&'static str; 2] = ["Location%2FLongitude", "Location%2FLatitude"];

    pub const DEFAULT_METHOD: &'static str = "rect";
    pub const DEFAULT_PARAMS: [f64; 4] = [122.56, 20.25, 31.04, 25.09];
}
