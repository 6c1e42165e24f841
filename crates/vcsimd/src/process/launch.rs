//! Daemon lifecycle: bootstrap, serve clients, stop on a termination signal.

use std::sync::Arc;

use tracing::{info, warn};

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
use crate::dispatch::DispatchConnectionHandler;
use crate::health::HealthReporter;
use crate::transport::{ListenerHandle, SocketListener};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Runs the daemon using the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Returns the first failure of bootstrap, endpoint startup, signal
/// installation or session teardown.
pub fn run_daemon() -> Result<(), LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_daemon_with(&SystemConfigLoader, reporter, &SystemShutdownSignal)
}

/// Runs the daemon with injected collaborators.
///
/// Shutdown runs in three steps. The endpoint stops accepting, so no new
/// request sees a half-stopped engine. The simulator then shuts down, which
/// answers every long poll still blocked with a `Cancelled` fault. Finally
/// the remaining client sockets are closed and their sessions joined.
pub(crate) fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    info!(target: PROCESS_TARGET, "starting daemon runtime");
    let daemon = bootstrap_with(loader, reporter)?;
    let sessions = match serve_clients(&daemon) {
        Ok(sessions) => sessions,
        Err(error) => {
            daemon.shutdown();
            return Err(error);
        }
    };

    let cause = shutdown.wait();
    match &cause {
        Ok(cause) => info!(target: PROCESS_TARGET, %cause, "stopping daemon"),
        Err(error) => warn!(target: PROCESS_TARGET, %error, "stopping daemon; signal watch failed"),
    }
    sessions.stop();
    let open = sessions.open_sessions();
    daemon.shutdown();
    sessions
        .join()
        .map_err(|source| LaunchError::Teardown { source })?;
    cause.map_err(|source| LaunchError::Signals { source })?;
    info!(target: PROCESS_TARGET, closed_sessions = open, "shutdown sequence completed");
    Ok(())
}

fn serve_clients(daemon: &Daemon) -> Result<ListenerHandle, LaunchError> {
    let config = daemon.config();
    let endpoint = config.daemon_socket();
    let unavailable = |source| LaunchError::Serve {
        endpoint: endpoint.to_string(),
        source,
    };
    let listener = SocketListener::bind(endpoint).map_err(unavailable)?;
    if let Some(addr) = listener.local_addr() {
        info!(target: PROCESS_TARGET, %addr, "bound TCP endpoint");
    }
    let handler = Arc::new(DispatchConnectionHandler::new(
        Arc::clone(daemon.simulator()),
        config.max_wait(),
    ));
    let sessions = listener.start(handler).map_err(unavailable)?;
    daemon.reporter().listener_ready(endpoint);
    Ok(sessions)
}
