//! Errors raised while opening or stopping the client endpoint.

use std::io;

use thiserror::Error;

/// Why a leftover Unix socket file could not be replaced.
#[derive(Debug, Error)]
pub enum StaleSocket {
    /// Another daemon still answers on the path.
    #[error("another daemon is listening")]
    InUse,
    /// The path exists but is not a socket.
    #[error("the path is not a socket")]
    NotASocket,
    /// Inspecting the path failed.
    #[error("cannot inspect it: {0}")]
    Inspect(#[source] io::Error),
    /// Removing the dead socket failed.
    #[error("cannot remove it: {0}")]
    Remove(#[source] io::Error),
}

/// Errors raised while opening the client endpoint or tearing it down.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host did not resolve to any address.
    #[error("cannot resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: Option<io::Error>,
    },
    /// Binding the endpoint failed.
    #[error("cannot listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// A file already occupies the Unix socket path.
    #[error("cannot reuse socket path {path}: {problem}")]
    Occupied { path: String, problem: StaleSocket },
    /// Switching the listener to polling mode failed.
    #[error("cannot configure listener on {endpoint}: {source}")]
    Configure {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("cannot start the accept thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    /// Threads serving the endpoint panicked.
    #[error("{count} listener thread(s) panicked")]
    Panicked { count: usize },
}
