//! Errors that stop the daemon.

use std::io;

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

/// Why the daemon could not start or did not stop cleanly.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration, telemetry or inventory setup failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The client endpoint could not be opened.
    #[error("cannot serve clients on {endpoint}: {source}")]
    Serve {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// Termination signals could not be watched.
    #[error("cannot watch for termination signals: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Client sessions did not wind down cleanly.
    #[error("client sessions did not stop cleanly: {source}")]
    Teardown {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}
