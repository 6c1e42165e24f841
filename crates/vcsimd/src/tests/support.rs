//! Test harness utilities for the daemon behavioural suites.

use std::ffi::OsString;
use std::sync::{Arc, Mutex};

use ortho_config::{OrthoConfig, OrthoError};

use vcsim_config::{Config, SocketEndpoint};
use vcsim_core::ModelCount;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;

/// Configuration listening on an ephemeral TCP port with instant tasks.
pub fn test_config(datacenters: u32, hosts_per_datacenter: u32, vms_per_host: u32) -> Config {
    Config {
        daemon_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        datacenters,
        hosts_per_datacenter,
        vms_per_host,
        task_delay_ms: 0,
        ..Config::default()
    }
}

/// Scenario world shared across bootstrap steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    /// Builds a world with a loader for a small default inventory.
    pub fn new() -> Self {
        Self {
            loader: Box::new(StaticConfigLoader::new(test_config(1, 1, 1))),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
        }
    }

    /// Installs a loader that resolves `config`.
    pub fn use_config(&mut self, config: Config) {
        self.loader = Box::new(StaticConfigLoader::new(config));
        self.reset_results();
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        match bootstrap_with(&*self.loader, reporter) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// The bootstrapped daemon.
    pub fn daemon(&self) -> &Daemon {
        self.daemon.as_ref().expect("daemon should have bootstrapped")
    }

    /// The bootstrap failure.
    pub fn bootstrap_error(&self) -> &BootstrapError {
        self.bootstrap_error
            .as_ref()
            .expect("bootstrap should have failed")
    }

    fn reset_results(&mut self) {
        self.daemon = None;
        self.bootstrap_error = None;
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.shutdown();
        }
    }
}

struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("vcsimd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

/// Health events captured by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed,
    InventoryReady(ModelCount),
    ListenerReady,
    ShutdownCompleted,
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, _error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed);
    }

    fn inventory_ready(&self, count: &ModelCount) {
        self.record(HealthEvent::InventoryReady(*count));
    }

    fn listener_ready(&self, _endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerReady);
    }

    fn shutdown_completed(&self) {
        self.record(HealthEvent::ShutdownCompleted);
    }
}
