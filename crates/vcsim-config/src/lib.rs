//! Shared configuration for the simulator daemon.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then a TOML file
//! (selected with `--config-path` or `VCSIM_CONFIG_PATH`), then `VCSIM_*`
//! environment variables, then command-line flags. The daemon converts the
//! resolved [`Config`] into the engine settings it hands to the simulator.

mod defaults;
mod logging;
mod model;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DATACENTERS, DEFAULT_HISTORY_CAPACITY, DEFAULT_HOSTS_PER_DATACENTER,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_WAIT_MS, DEFAULT_PAGE_SIZE, DEFAULT_TASK_DELAY_MS,
    DEFAULT_TASK_HISTORY_LIMIT, DEFAULT_TCP_PORT, DEFAULT_VMS_PER_HOST, default_datacenters,
    default_history_capacity, default_hosts_per_datacenter, default_log_filter,
    default_log_filter_string, default_log_format, default_max_wait_ms, default_model,
    default_page_size, default_socket_endpoint, default_task_delay_ms,
    default_task_history_limit, default_vms_per_host,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use model::{ModelKind, ModelKindParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "VCSIM")]
pub struct Config {
    /// Socket the daemon listens on.
    #[serde(default = "default_socket_endpoint")]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for log records.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Which inventory flavour to build at startup.
    #[serde(default = "default_model")]
    pub model: ModelKind,
    /// Number of datacenters created by the vCenter-style model.
    #[serde(default = "default_datacenters")]
    pub datacenters: u32,
    /// Hosts created inside each datacenter.
    #[serde(default = "default_hosts_per_datacenter")]
    pub hosts_per_datacenter: u32,
    /// Virtual machines created on each host.
    #[serde(default = "default_vms_per_host")]
    pub vms_per_host: u32,
    /// Completed tasks kept in the inventory before the oldest are evicted.
    #[serde(default = "default_task_history_limit")]
    pub task_history_limit: u32,
    /// Items retained per history stream (tasks, events).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: u32,
    /// Initial `latestPage` size for new history collectors.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Upper bound, in milliseconds, for long-poll waits issued over the wire.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Simulated work per asynchronous operation step, in milliseconds.
    #[serde(default = "default_task_delay_ms")]
    pub task_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            model: default_model(),
            datacenters: default_datacenters(),
            hosts_per_datacenter: default_hosts_per_datacenter(),
            vms_per_host: default_vms_per_host(),
            task_history_limit: default_task_history_limit(),
            history_capacity: default_history_capacity(),
            default_page_size: default_page_size(),
            max_wait_ms: default_max_wait_ms(),
            task_delay_ms: default_task_delay_ms(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer fails to parse.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Socket endpoint the daemon binds.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Inventory flavour.
    #[must_use]
    pub fn model(&self) -> ModelKind {
        self.model
    }

    /// Cap applied to long-poll waits requested by clients.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Delay used by simulated asynchronous operations.
    #[must_use]
    pub fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }
}
