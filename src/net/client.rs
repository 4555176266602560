use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::net::stream::NetworkStream;
use crate::net::types::{NetworkAddress, NetworkEndpoint};
use crate::utils::error::NetworkError;

/// A TCP client: a configured remote endpoint plus the stream of the current
/// connection.
///
/// Connect/disconnect is a thin wrapper around socket creation and the
/// stream. The stream is shared: a caller holding [`TcpClient::stream`] keeps
/// doing I/O on it even after the client swaps in a new connection.
pub struct TcpClient {
    state: Mutex<ClientState>,
}

struct ClientState {
    remote_endpoint: NetworkEndpoint,
    stream: Arc<NetworkStream>,
    read_timeout: Duration,
    nagle_enabled: bool,
}

impl TcpClient {
    /// Creates a disconnected client for the given remote address and port.
    pub fn new(address: impl Into<NetworkAddress>, port: u16) -> Self {
        Self {
            state: Mutex::new(ClientState {
                remote_endpoint: NetworkEndpoint::new(address, port),
                stream: Arc::new(NetworkStream::closed()),
                read_timeout: NetworkStream::DEFAULT_READ_TIMEOUT,
                nagle_enabled: true,
            }),
        }
    }

    /// Connects to the configured endpoint if not already connected.
    ///
    /// The stored Nagle setting and read timeout are applied to the fresh
    /// stream before it becomes visible through [`TcpClient::stream`].
    pub async fn connect(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        if state.stream.is_open().await {
            return Ok(());
        }
        let addr = SocketAddr::from(state.remote_endpoint);
        let socket = TcpStream::connect(addr).await?;
        let stream = Arc::new(NetworkStream::new(socket));
        if state.nagle_enabled {
            stream.enable_nagle_algorithm().await?;
        } else {
            stream.disable_nagle_algorithm().await?;
        }
        stream.set_read_timeout(state.read_timeout).await;
        debug!(endpoint = %state.remote_endpoint, "tcp client connected");
        state.stream = stream;
        Ok(())
    }

    /// Disconnects from the server.
    pub async fn disconnect(&self) -> Result<(), NetworkError> {
        let state = self.state.lock().await;
        state.stream.close().await
    }

    /// Checks whether the client is connected.
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.stream.is_open().await
    }

    /// Enables the Nagle algorithm on this and future connections.
    pub async fn enable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        state.nagle_enabled = true;
        state.stream.enable_nagle_algorithm().await
    }

    /// Disables the Nagle algorithm on this and future connections.
    pub async fn disable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        state.nagle_enabled = false;
        state.stream.disable_nagle_algorithm().await
    }

    /// Gets the read operation timeout.
    pub async fn read_timeout(&self) -> Duration {
        self.state.lock().await.read_timeout
    }

    /// Sets the read operation timeout on this and future connections.
    pub async fn set_read_timeout(&self, timeout: Duration) {
        let mut state = self.state.lock().await;
        state.read_timeout = timeout;
        state.stream.set_read_timeout(timeout).await;
    }

    /// Gets the local endpoint of the current connection.
    pub async fn local_endpoint(&self) -> Result<NetworkEndpoint, NetworkError> {
        let state = self.state.lock().await;
        state.stream.local_endpoint().await
    }

    /// Gets the configured remote endpoint.
    pub async fn remote_endpoint(&self) -> NetworkEndpoint {
        self.state.lock().await.remote_endpoint
    }

    /// Re-targets the client; the current connection is closed first.
    pub async fn set_remote_endpoint(
        &self,
        address: impl Into<NetworkAddress>,
        port: u16,
    ) -> Result<(), NetworkError> {
        let endpoint = NetworkEndpoint::new(address, port);
        let mut state = self.state.lock().await;
        state.stream.close().await?;
        state.remote_endpoint = endpoint;
        Ok(())
    }

    /// Gets the client stream (shared with any in-flight I/O).
    pub async fn stream(&self) -> Arc<NetworkStream> {
        self.state.lock().await.stream.clone()
    }
}
