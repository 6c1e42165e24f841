#[cfg(unix)]
use camino::Utf8PathBuf;
#[cfg(unix)]
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::logging::LogFormat;
use crate::model::ModelKind;
use crate::socket::SocketEndpoint;

/// TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 8989;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Datacenters in the default vCenter-style inventory.
pub const DEFAULT_DATACENTERS: u32 = 1;

/// Hosts per datacenter in the default inventory.
pub const DEFAULT_HOSTS_PER_DATACENTER: u32 = 3;

/// Virtual machines per host in the default inventory.
pub const DEFAULT_VMS_PER_HOST: u32 = 2;

/// Completed tasks retained before eviction.
pub const DEFAULT_TASK_HISTORY_LIMIT: u32 = 200;

/// Items retained per history stream.
pub const DEFAULT_HISTORY_CAPACITY: u32 = 1000;

/// Initial `latestPage` size of history collectors.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Long-poll cap for waits issued over the transport.
pub const DEFAULT_MAX_WAIT_MS: u64 = 60_000;

/// Simulated work per asynchronous operation step.
pub const DEFAULT_TASK_DELAY_MS: u64 = 10;

/// Default log filter expression used by the daemon.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default inventory flavour.
#[must_use]
pub fn default_model() -> ModelKind {
    ModelKind::Vpx
}

#[must_use]
pub fn default_datacenters() -> u32 {
    DEFAULT_DATACENTERS
}

#[must_use]
pub fn default_hosts_per_datacenter() -> u32 {
    DEFAULT_HOSTS_PER_DATACENTER
}

#[must_use]
pub fn default_vms_per_host() -> u32 {
    DEFAULT_VMS_PER_HOST
}

#[must_use]
pub fn default_task_history_limit() -> u32 {
    DEFAULT_TASK_HISTORY_LIMIT
}

#[must_use]
pub fn default_history_capacity() -> u32 {
    DEFAULT_HISTORY_CAPACITY
}

#[must_use]
pub fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[must_use]
pub fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

#[must_use]
pub fn default_task_delay_ms() -> u64 {
    DEFAULT_TASK_DELAY_MS
}

/// Computes the default socket endpoint for the daemon.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("vcsim");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("vcsimd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
