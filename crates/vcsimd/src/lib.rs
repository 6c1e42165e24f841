//! Daemon serving the vcsim managed-object engine.
//!
//! The daemon loads layered configuration through [`vcsim_config`], installs
//! structured telemetry, builds the configured inventory inside a
//! [`vcsim_core::Simulator`] and exposes it on a socket. Clients speak a
//! line-delimited JSON protocol: each request line names a method (`invoke`,
//! `retrieveProperties`, `createFilter`, `waitForUpdates`, `destroyFilter`)
//! and receives exactly one response line. Connections stay open so
//! long-poll clients can re-issue `waitForUpdates` without reconnecting.
//!
//! Health reporting hooks emit structured telemetry at each lifecycle stage.
//! A termination signal stops the listener and then shuts the simulator
//! down, which releases any client still blocked in a long poll. The open
//! client sessions are closed last; filters and collectors a client leaves
//! behind are destroyed when its session ends.

mod bootstrap;
mod dispatch;
mod health;
mod process;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, run_daemon};
pub use transport::{ListenerError, StaleSocket};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
