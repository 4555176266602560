// src/net/mod.rs
pub mod client;
pub mod interface;
pub mod server;
pub mod stream;
pub mod types;

// Re-export public components
pub use client::TcpClient;
pub use interface::{
    Ethernet, InterfaceEvent, InterfaceEvents, IpV4Settings, IpV6Settings, NetworkInterface,
    WifiStation,
};
pub use server::{RequestHandler, ServerEvent, TaskParameters, TcpServer};
pub use stream::{NetworkStream, StreamOptions};
pub use types::{NetworkAddress, NetworkEndpoint};
