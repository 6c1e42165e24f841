//! Accept loop of the client endpoint.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use vcsim_config::SocketEndpoint;

use super::session::{SessionHandler, SessionTable};
use super::{ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use super::StaleSocket;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// How long the accept loop sleeps when no client is waiting.
const IDLE_POLL: Duration = Duration::from_millis(25);
/// How long the accept loop backs off after a failed accept.
const FAILURE_BACKOFF: Duration = Duration::from_millis(150);

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Acceptor {
    fn set_polling(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Takes the next waiting client, if any.
    fn poll(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => stream.into_blocking().map(Some),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Bound client endpoint that has not started accepting yet.
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

impl SocketListener {
    /// Binds `endpoint`. A dead Unix socket left by an earlier daemon is
    /// replaced; a live one is refused.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { host, port } => Acceptor::Tcp(bind_tcp(endpoint, host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => Acceptor::Unix(bind_unix(endpoint, path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::Bind {
                    endpoint: endpoint.to_string(),
                    source: io::Error::from(io::ErrorKind::Unsupported),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Address actually bound, which differs from the configured one when an
    /// ephemeral TCP port was requested.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Acceptor::Unix(_) => None,
        }
    }

    pub(crate) fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Starts accepting clients; each one is served by `handler` in its own
    /// session.
    pub(crate) fn start(self, handler: Arc<dyn SessionHandler>) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_polling() {
            self.remove_socket_file();
            return Err(ListenerError::Configure {
                endpoint: self.endpoint.to_string(),
                source,
            });
        }
        let stopping = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(SessionTable::default());
        let accept = {
            let stopping = Arc::clone(&stopping);
            let sessions = Arc::clone(&sessions);
            thread::Builder::new()
                .name("vcsimd-accept".to_owned())
                .spawn(move || self.accept_until_stopped(&stopping, &sessions, &handler))
                .map_err(|source| ListenerError::Spawn { source })?
        };
        Ok(ListenerHandle {
            stopping,
            accept: Some(accept),
            sessions,
        })
    }

    fn accept_until_stopped(
        self,
        stopping: &AtomicBool,
        sessions: &Arc<SessionTable>,
        handler: &Arc<dyn SessionHandler>,
    ) {
        info!(target: LISTENER_TARGET, endpoint = %self.endpoint, "accepting clients");
        let mut repeated_failure = None::<io::ErrorKind>;
        while !stopping.load(Ordering::SeqCst) {
            match self.acceptor.poll() {
                Ok(Some(stream)) => {
                    repeated_failure = None;
                    if let Err(error) = sessions.open(stream, handler) {
                        warn!(target: LISTENER_TARGET, %error, "cannot start session; client dropped");
                    }
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if repeated_failure != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, %error, "accept failed");
                    }
                    repeated_failure = Some(error.kind());
                    thread::sleep(FAILURE_BACKOFF);
                }
            }
        }
        self.remove_socket_file();
        debug!(target: LISTENER_TARGET, endpoint = %self.endpoint, "stopped accepting clients");
    }

    fn remove_socket_file(&self) {
        let Some(path) = self.endpoint.unix_path() else {
            return;
        };
        if let Err(error) = std::fs::remove_file(path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(target: LISTENER_TARGET, %error, %path, "cannot remove socket file");
        }
    }
}

/// Running client endpoint: the accept thread plus its sessions.
pub(crate) struct ListenerHandle {
    stopping: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    sessions: Arc<SessionTable>,
}

impl ListenerHandle {
    /// Stops accepting new clients. Open sessions keep running until
    /// [`ListenerHandle::join`].
    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Number of clients currently connected.
    pub(crate) fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stops accepting, closes every open session and waits for all
    /// listener threads.
    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.stop();
        let mut panicked = 0;
        if let Some(accept) = self.accept.take()
            && accept.join().is_err()
        {
            panicked += 1;
        }
        panicked += self.sessions.close_all();
        if panicked == 0 {
            Ok(())
        } else {
            Err(ListenerError::Panicked { count: panicked })
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_tcp(endpoint: &SocketEndpoint, host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let unresolved = |source| ListenerError::Resolve {
        host: host.to_owned(),
        port,
        source,
    };
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|error| unresolved(Some(error)))?
        .next()
        .ok_or_else(|| unresolved(None))?;
    TcpListener::bind(addr).map_err(|source| ListenerError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(unix)]
fn bind_unix(endpoint: &SocketEndpoint, path: &Path) -> Result<UnixListener, ListenerError> {
    clear_dead_socket(path).map_err(|problem| ListenerError::Occupied {
        path: path.display().to_string(),
        problem,
    })?;
    UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Removes a socket file whose daemon is gone. Nothing at `path` is fine.
#[cfg(unix)]
fn clear_dead_socket(path: &Path) -> Result<(), StaleSocket> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(StaleSocket::Inspect(error)),
    };
    if !metadata.file_type().is_socket() {
        return Err(StaleSocket::NotASocket);
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(StaleSocket::InUse),
        Err(error) if matches!(error.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound) => {
            debug!(target: LISTENER_TARGET, path = %path.display(), "replacing dead socket file");
            std::fs::remove_file(path).map_err(StaleSocket::Remove)
        }
        Err(error) => Err(StaleSocket::Inspect(error)),
    }
}
