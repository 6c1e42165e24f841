//! Daemon process supervision: endpoint startup and signal-driven shutdown.

mod errors;
mod launch;
mod shutdown;

pub use self::errors::LaunchError;
pub use self::launch::run_daemon;
#[cfg(test)]
pub(crate) use self::launch::run_daemon_with;
#[cfg(test)]
pub(crate) use self::shutdown::{ShutdownCause, ShutdownSignal};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
