use thiserror::Error;

/// Represents various errors that can occur in the networking layer.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Represents a socket-level I/O failure.
    ///
    /// Failures on an individual stream close that stream; they are never
    /// escalated to a server-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Indicates that a read did not complete within the configured timeout.
    ///
    /// The stream stays open; the caller may retry.
    #[error("Read timed out")]
    Timeout,

    /// Indicates an operation on a stream that is already closed.
    #[error("Stream is closed")]
    StreamClosed,

    /// Indicates that the remote end closed the connection mid-operation.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Represents a failure to start or stop the server worker task.
    #[error("Worker task error: {0}")]
    Task(String),

    /// Aggregate result of applying a socket option to several streams.
    ///
    /// Application is best-effort: one stream's failure does not stop the
    /// others, so the error only carries the counts.
    #[error("Failed to apply socket options to {failed} of {total} streams")]
    SocketOptions { failed: usize, total: usize },

    /// Represents an error in the application configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Indicates that a string could not be parsed as a network address.
    #[error("Invalid network address: {0}")]
    AddressParse(String),

    /// Indicates an operation that requires a different lifecycle state,
    /// such as connecting a client whose endpoint has no address family.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
