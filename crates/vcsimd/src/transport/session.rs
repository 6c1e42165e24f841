//! Client sessions: one thread per accepted connection.
//!
//! The [`SessionTable`] remembers every open session so that stopping the
//! daemon can close their sockets and wait for their threads. A session
//! removes itself from the table when its handler returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::{ConnectionStream, LISTENER_TARGET};

/// One accepted client connection.
#[derive(Debug)]
pub(crate) struct Session {
    id: u64,
    peer: String,
    stream: ConnectionStream,
}

impl Session {
    /// Identifier unique for the daemon's lifetime.
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn into_stream(self) -> ConnectionStream {
        self.stream
    }
}

/// Serves one session until its client goes away.
pub(crate) trait SessionHandler: Send + Sync + 'static {
    fn serve(&self, session: Session);
}

struct OpenSession {
    closer: ConnectionStream,
    thread: Option<JoinHandle<()>>,
}

/// Sessions currently being served.
#[derive(Default)]
pub(crate) struct SessionTable {
    last_id: AtomicU64,
    open: Mutex<HashMap<u64, OpenSession>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, OpenSession>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts serving `stream` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns the IO error when the socket cannot be duplicated or the
    /// thread cannot be spawned; the client is dropped in both cases.
    pub(crate) fn open(
        self: &Arc<Self>,
        stream: ConnectionStream,
        handler: &Arc<dyn SessionHandler>,
    ) -> std::io::Result<u64> {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let closer = stream.try_clone()?;
        let session = Session {
            id,
            peer: stream.peer(),
            stream,
        };
        self.lock().insert(id, OpenSession { closer, thread: None });

        let table = Arc::clone(self);
        let handler = Arc::clone(handler);
        let spawned = thread::Builder::new()
            .name(format!("vcsimd-session-{id}"))
            .spawn(move || {
                handler.serve(session);
                table.forget(id);
            });
        match spawned {
            Ok(thread) => {
                // The session may already have finished and forgotten itself.
                if let Some(entry) = self.lock().get_mut(&id) {
                    entry.thread = Some(thread);
                }
                debug!(target: LISTENER_TARGET, session = id, "session opened");
                Ok(id)
            }
            Err(error) => {
                self.forget(id);
                Err(error)
            }
        }
    }

    fn forget(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!(target: LISTENER_TARGET, session = id, "session closed");
        }
    }

    /// Number of sessions still being served.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Closes every open socket and waits for the session threads.
    ///
    /// Returns how many session threads panicked.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<(u64, OpenSession)> = self.lock().drain().collect();
        for (id, session) in &drained {
            if let Err(error) = session.closer.close() {
                debug!(target: LISTENER_TARGET, session = id, %error, "session socket already closed");
            }
        }
        let mut panicked = 0;
        for (id, session) in drained {
            if let Some(thread) = session.thread
                && thread.join().is_err()
            {
                warn!(target: LISTENER_TARGET, session = id, "session thread panicked");
                panicked += 1;
            }
        }
        panicked
    }
}
