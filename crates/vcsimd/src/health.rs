//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use vcsim_config::{Config, SocketEndpoint};
use vcsim_core::ModelCount;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the initial inventory has been built.
    fn inventory_ready(&self, count: &ModelCount);

    /// Invoked when the socket listener starts accepting clients.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked after the simulator has been shut down.
    fn shutdown_completed(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn inventory_ready(&self, count: &ModelCount) {
        (**self).inventory_ready(count);
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        (**self).listener_ready(endpoint);
    }

    fn shutdown_completed(&self) {
        (**self).shutdown_completed();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            model = %config.model(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn inventory_ready(&self, count: &ModelCount) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "inventory_ready",
            datacenters = count.datacenters,
            hosts = count.hosts,
            machines = count.machines,
            "inventory built"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            endpoint = %endpoint,
            "accepting clients"
        );
    }

    fn shutdown_completed(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            "simulator stopped"
        );
    }
}
