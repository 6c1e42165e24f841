//! Client endpoint of the daemon.
//!
//! The listener binds the configured TCP or Unix endpoint and polls for
//! clients on a background thread. Every accepted connection becomes a
//! [`Session`] served by a [`SessionHandler`] on its own thread. Joining the
//! [`ListenerHandle`] closes the sockets of sessions still open, so idle
//! clients blocked on a read are released during shutdown.

mod errors;
mod listener;
mod session;
mod stream;
#[cfg(test)]
mod test_utils;

pub use self::errors::{ListenerError, StaleSocket};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
pub(crate) use self::session::{Session, SessionHandler};
pub(crate) use self::stream::ConnectionStream;
#[cfg(test)]
pub(crate) use self::test_utils::EchoSessions;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
