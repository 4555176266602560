use std::fmt;
use std::time::Duration;

use futures_util::FutureExt;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::net::types::NetworkEndpoint;
use crate::utils::error::NetworkError;

/// Per-stream socket options a server pushes onto its accepted streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Whether the Nagle algorithm is enabled (enabled means nodelay off).
    pub nagle_enabled: bool,
    /// Whether TCP keep-alive probing is enabled.
    pub keep_alive_enabled: bool,
    /// Idle time before the first keep-alive probe is sent.
    pub keep_alive_idle_time: Duration,
    /// Interval between keep-alive probes.
    pub keep_alive_interval: Duration,
    /// Number of unanswered probes before the connection is dropped.
    pub keep_alive_count: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            nagle_enabled: true,
            keep_alive_enabled: false,
            keep_alive_idle_time: Duration::from_secs(7200),
            keep_alive_interval: Duration::from_secs(75),
            keep_alive_count: 9,
        }
    }
}

/// Upper bound on the byte count a single `readable_size` probe reports.
const READABLE_PROBE_SIZE: usize = 4096;

/// A lockable, closable byte stream over one connected TCP socket.
///
/// All I/O goes through the stream's own internal lock, so a server can keep
/// sweeping and accepting other clients while one stream is mid-read, and a
/// snapshot holder can use a stream concurrently with the accept loop.
///
/// Closure is sticky: once a read, write or readable-byte probe observes the
/// peer gone, the socket is dropped and every later operation reports
/// [`NetworkError::StreamClosed`].
pub struct NetworkStream {
    id: Uuid,
    state: Mutex<StreamState>,
}

struct StreamState {
    socket: Option<TcpStream>,
    read_timeout: Duration,
}

impl NetworkStream {
    /// Default read operation timeout.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(300);

    /// Wraps a connected socket.
    pub fn new(socket: TcpStream) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(StreamState {
                socket: Some(socket),
                read_timeout: Self::DEFAULT_READ_TIMEOUT,
            }),
        }
    }

    /// Creates a stream that is already closed.
    ///
    /// Useful as the initial state of a client that has not connected yet.
    pub fn closed() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(StreamState {
                socket: None,
                read_timeout: Self::DEFAULT_READ_TIMEOUT,
            }),
        }
    }

    /// Stable identity of this stream, independent of its socket state.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Reads exactly `dest.len()` bytes.
    ///
    /// Each chunk is awaited under the configured read timeout. A timeout
    /// leaves the stream open and returns [`NetworkError::Timeout`]; EOF or
    /// an I/O error closes the stream and returns the failure.
    pub async fn read(&self, dest: &mut [u8]) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        let timeout = state.read_timeout;
        let mut filled = 0;
        let mut result = Ok(());
        while filled < dest.len() {
            let socket = state.socket.as_mut().ok_or(NetworkError::StreamClosed)?;
            match tokio::time::timeout(timeout, socket.read(&mut dest[filled..])).await {
                Ok(Ok(0)) => {
                    result = Err(NetworkError::ConnectionClosed);
                    break;
                }
                Ok(Ok(size)) => filled += size,
                Ok(Err(e)) => {
                    result = Err(e.into());
                    break;
                }
                Err(_) => return Err(NetworkError::Timeout),
            }
        }
        if result.is_err() {
            state.socket = None;
        }
        result
    }

    /// Reads and discards exactly `size` bytes, with `read` semantics.
    pub async fn skip(&self, size: usize) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        let timeout = state.read_timeout;
        let mut buf = [0u8; 256];
        let mut remaining = size;
        let mut result = Ok(());
        while remaining > 0 {
            let socket = state.socket.as_mut().ok_or(NetworkError::StreamClosed)?;
            let chunk = remaining.min(buf.len());
            match tokio::time::timeout(timeout, socket.read(&mut buf[..chunk])).await {
                Ok(Ok(0)) => {
                    result = Err(NetworkError::ConnectionClosed);
                    break;
                }
                Ok(Ok(discarded)) => remaining -= discarded,
                Ok(Err(e)) => {
                    result = Err(e.into());
                    break;
                }
                Err(_) => return Err(NetworkError::Timeout),
            }
        }
        if result.is_err() {
            state.socket = None;
        }
        result
    }

    /// Writes the whole buffer; any failure closes the stream.
    pub async fn write(&self, src: &[u8]) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        let socket = state.socket.as_mut().ok_or(NetworkError::StreamClosed)?;
        if src.is_empty() {
            return Ok(());
        }
        match socket.write_all(src).await {
            Ok(()) => Ok(()),
            Err(e) => {
                state.socket = None;
                Err(e.into())
            }
        }
    }

    /// Closes the stream. Idempotent.
    pub async fn close(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        if let Some(mut socket) = state.socket.take() {
            let _ = socket.shutdown().await;
        }
        Ok(())
    }

    /// Checks whether the stream still owns a socket.
    ///
    /// Purely local: a peer-side close is only noticed by the next read,
    /// write or readable-byte probe.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.socket.is_some()
    }

    /// Zero-timeout probe of the readable byte count (capped at a probe
    /// buffer's worth).
    ///
    /// A socket that polls readable with zero pending bytes means the peer
    /// closed the connection; the stream is closed in place and `0` returned.
    pub async fn readable_size(&self) -> usize {
        let mut state = self.state.lock().await;
        let Some(socket) = state.socket.as_ref() else {
            return 0;
        };
        let mut buf = [0u8; READABLE_PROBE_SIZE];
        match socket.peek(&mut buf).now_or_never() {
            None => 0,
            Some(Ok(0)) | Some(Err(_)) => {
                state.socket = None;
                0
            }
            Some(Ok(size)) => size,
        }
    }

    /// Gets the read operation timeout.
    pub async fn read_timeout(&self) -> Duration {
        self.state.lock().await.read_timeout
    }

    /// Sets the read operation timeout.
    pub async fn set_read_timeout(&self, timeout: Duration) {
        self.state.lock().await.read_timeout = timeout;
    }

    /// Gets the local endpoint of the stream.
    pub async fn local_endpoint(&self) -> Result<NetworkEndpoint, NetworkError> {
        let state = self.state.lock().await;
        let socket = state.socket.as_ref().ok_or(NetworkError::StreamClosed)?;
        Ok(socket.local_addr()?.into())
    }

    /// Gets the remote endpoint of the stream.
    pub async fn remote_endpoint(&self) -> Result<NetworkEndpoint, NetworkError> {
        let state = self.state.lock().await;
        let socket = state.socket.as_ref().ok_or(NetworkError::StreamClosed)?;
        Ok(socket.peer_addr()?.into())
    }

    /// Enables the Nagle algorithm.
    pub async fn enable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_nodelay(false)).await
    }

    /// Disables the Nagle algorithm.
    pub async fn disable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_nodelay(true)).await
    }

    /// Enables keep-alive probing.
    pub async fn enable_keep_alive(&self) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_keepalive(true)).await
    }

    /// Disables keep-alive probing.
    pub async fn disable_keep_alive(&self) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_keepalive(false)).await
    }

    /// Sets the idle time before keep-alive probes are sent.
    pub async fn set_keep_alive_idle_time(&self, idle_time: Duration) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle_time)))
            .await
    }

    /// Sets the keep-alive probe interval.
    pub async fn set_keep_alive_interval(&self, interval: Duration) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| {
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_interval(interval))
        })
        .await
    }

    /// Sets the number of unanswered keep-alive probes before drop.
    pub async fn set_keep_alive_count(&self, count: u32) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| sock.set_tcp_keepalive(&TcpKeepalive::new().with_retries(count)))
            .await
    }

    /// Applies a whole option set in one pass.
    pub async fn apply_options(&self, options: &StreamOptions) -> Result<(), NetworkError> {
        self.with_sock_ref(|sock| {
            sock.set_nodelay(!options.nagle_enabled)?;
            sock.set_keepalive(options.keep_alive_enabled)?;
            sock.set_tcp_keepalive(
                &TcpKeepalive::new()
                    .with_time(options.keep_alive_idle_time)
                    .with_interval(options.keep_alive_interval)
                    .with_retries(options.keep_alive_count),
            )
        })
        .await
    }

    // Socket options on a closed stream succeed as no-ops; the stream is
    // going away and its configuration no longer matters.
    async fn with_sock_ref(
        &self,
        f: impl FnOnce(SockRef<'_>) -> std::io::Result<()>,
    ) -> Result<(), NetworkError> {
        let state = self.state.lock().await;
        match state.socket.as_ref() {
            Some(socket) => Ok(f(SockRef::from(socket))?),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for NetworkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStream").field("id", &self.id).finish()
    }
}
