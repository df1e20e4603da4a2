//! Error types shared by the server, the sessions and the terminal client.

use std::io;

/// Failures while framing lines on a connection.
///
/// Every variant is fatal to the connection it happened on and to nothing else.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A line grew past the configured maximum before a newline arrived.
    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// The peer sent bytes that are not UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Top level errors surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The listening socket could not be created.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The accept loop hit an error it cannot recover from.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The client could not reach the server.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Framing failed on the client's connection or terminal.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
