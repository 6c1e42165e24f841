//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use vcsim_config::{Config, SocketPreparationError};
use vcsim_core::{Fault, Model, Simulator, SimulatorSettings};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a configuration resolved ahead of time.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already-resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The configured inventory could not be built.
    #[error("failed to build inventory: {source}")]
    Inventory {
        /// Fault raised by the engine.
        #[source]
        source: Fault,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    simulator: Arc<Simulator>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The simulator serving this daemon's clients.
    #[must_use]
    pub fn simulator(&self) -> &Arc<Simulator> {
        &self.simulator
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn HealthReporter> {
        &self.reporter
    }

    /// Shuts the simulator down, releasing blocked waiters and task workers.
    pub fn shutdown(&self) {
        if self.simulator.is_shut_down() {
            return;
        }
        self.simulator.shutdown();
        self.reporter.shutdown_completed();
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// # Errors
///
/// Returns the first failing stage: configuration, telemetry, socket
/// preparation or inventory construction. The reporter sees the same error
/// before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.daemon_socket().prepare_filesystem() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let model = Model::from_config(&config);
    let simulator = match Simulator::with_model(SimulatorSettings::from(&config), &model) {
        Ok(simulator) => Arc::new(simulator),
        Err(source) => {
            let error = BootstrapError::Inventory { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };
    reporter.inventory_ready(&Model::count(simulator.registry()));
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        simulator,
        telemetry,
        reporter,
    })
}
