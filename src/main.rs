//! # TCP echo server demo
//!
//! Wires the library's `TcpServer` into a byte-for-byte echo service with
//! environment-based configuration, event logging and graceful shutdown.
//!
//! ## Features
//! - Bounded multi-client TCP echo on a configurable port
//! - Environment-based configuration loading (`NET_*` variables)
//! - Connection lifecycle logging through the server's event stream
//! - Graceful shutdown handling

use std::sync::Arc;

use async_trait::async_trait;
use nethal_rs::config::AppConfig;
use nethal_rs::net::{NetworkStream, RequestHandler, ServerEvent, TcpServer};
use nethal_rs::utils::NetworkError;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Echoes every currently readable byte back to the client.
struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(
        &self,
        _server: &TcpServer,
        stream: &Arc<NetworkStream>,
    ) -> Result<(), NetworkError> {
        let mut byte = [0u8; 1];
        while stream.readable_size().await > 0 {
            stream.read(&mut byte).await?;
            stream.write(&byte).await?;
        }
        Ok(())
    }
}

/// Entry point for the echo server demo.
///
/// Initializes logging, loads configuration from the environment and runs
/// the server until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    config.validate()?;

    let server = TcpServer::new(config.port, EchoHandler);
    server.set_max_clients(config.max_clients).await?;
    server.set_task_parameters(config.task_parameters()).await?;

    let options = config.stream_options();
    if options.nagle_enabled {
        server.enable_nagle_algorithm().await?;
    } else {
        server.disable_nagle_algorithm().await?;
    }
    if options.keep_alive_enabled {
        server.enable_keep_alive().await?;
    } else {
        server.disable_keep_alive().await?;
    }
    server.set_keep_alive_idle_time(options.keep_alive_idle_time).await?;
    server.set_keep_alive_interval(options.keep_alive_interval).await?;
    server.set_keep_alive_count(options.keep_alive_count).await?;

    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ServerEvent::Enabled) => info!("server enabled"),
                Ok(ServerEvent::Disabled) => info!("server disabled"),
                Ok(ServerEvent::ClientConnected(stream)) => match stream.remote_endpoint().await {
                    Ok(endpoint) => info!(%endpoint, "client connected"),
                    Err(_) => info!(stream = %stream.id(), "client connected"),
                },
                Ok(ServerEvent::ClientDisconnected(stream)) => {
                    info!(stream = %stream.id(), "client disconnected");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    server.enable().await?;
    info!(port = server.port(), "echo server running; press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("shutting down");
    server.disable().await?;
    Ok(())
}
