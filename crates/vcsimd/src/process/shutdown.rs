//! Termination triggers for the daemon.

use std::fmt;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// What ended the daemon's serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownCause {
    /// A termination signal arrived.
    Signal(i32),
    /// The embedding code asked for shutdown.
    Requested,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Signal(SIGTERM) => f.write_str("SIGTERM"),
            Self::Signal(SIGINT) => f.write_str("SIGINT"),
            Self::Signal(SIGQUIT) => f.write_str("SIGQUIT"),
            Self::Signal(SIGHUP) => f.write_str("SIGHUP"),
            Self::Signal(other) => write!(f, "signal {other}"),
            Self::Requested => f.write_str("shutdown request"),
        }
    }
}

/// Blocks the launching thread until the daemon should stop.
pub(crate) trait ShutdownSignal: Send + Sync {
    /// Waits for the next termination trigger.
    fn wait(&self) -> io::Result<ShutdownCause>;
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> io::Result<ShutdownCause> {
        let mut signals = Signals::new(TERMINATION_SIGNALS)?;
        Ok(signals
            .forever()
            .next()
            .map_or(ShutdownCause::Requested, ShutdownCause::Signal))
    }
}
