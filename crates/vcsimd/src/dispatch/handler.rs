//! Connection handler that dispatches JSONL requests.
//!
//! `DispatchConnectionHandler` implements the transport's `SessionHandler`
//! trait. It reads request lines until the client disconnects, routes each
//! one to the simulator and writes exactly one response line per request.
//! Filters and collectors the client leaves behind are destroyed when the
//! session ends.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use vcsim_core::Simulator;

use crate::transport::{ConnectionStream, Session, SessionHandler};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::request::RequestEnvelope;
use super::response::ResponseWriter;
use super::router::MethodRouter;
use super::session::SessionScope;

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Connection handler that parses and dispatches JSONL requests.
pub struct DispatchConnectionHandler {
    simulator: Arc<Simulator>,
    router: MethodRouter,
}

impl DispatchConnectionHandler {
    /// Creates a handler serving `simulator`; client long polls never block
    /// longer than `max_wait`.
    pub fn new(simulator: Arc<Simulator>, max_wait: Duration) -> Self {
        Self {
            router: MethodRouter::new(Arc::clone(&simulator), max_wait),
            simulator,
        }
    }

    /// Serves requests until the client disconnects or a framing error
    /// forces the connection closed.
    fn serve_requests(&self, stream: ConnectionStream, scope: &mut SessionScope) {
        let read_half = match stream.try_clone() {
            Ok(read_half) => read_half,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to split connection");
                return;
            }
        };
        let mut reader = BufReader::new(read_half);
        let mut writer = ResponseWriter::new(stream);

        loop {
            let line = match read_request_line(&mut reader) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(target: DISPATCH_TARGET, "client disconnected");
                    return;
                }
                Err(error) => {
                    warn!(target: DISPATCH_TARGET, %error, "failed to read request");
                    if let Err(write_error) = writer.write_error(&error) {
                        debug!(target: DISPATCH_TARGET, error = %write_error, "failed to report read error");
                    }
                    return;
                }
            };
            if line.trim_ascii().is_empty() {
                continue;
            }

            let outcome = RequestEnvelope::parse(&line).and_then(|request| self.router.route(&request, scope));
            let written = match &outcome {
                Ok(response) => writer.write_response(response),
                Err(error) => {
                    warn!(target: DISPATCH_TARGET, %error, "request rejected");
                    writer.write_error(error)
                }
            };
            if let Err(error) = written {
                warn!(target: DISPATCH_TARGET, %error, "failed to write response");
                return;
            }
            if let Err(error) = &outcome
                && error.closes_connection()
            {
                return;
            }
        }
    }
}

impl SessionHandler for DispatchConnectionHandler {
    fn serve(&self, session: Session) {
        let id = session.id();
        debug!(target: DISPATCH_TARGET, session = id, peer = session.peer(), "serving client");
        let mut scope = SessionScope::default();
        self.serve_requests(session.into_stream(), &mut scope);
        if scope.len() > 0 {
            debug!(target: DISPATCH_TARGET, session = id, owned = scope.len(), "releasing session objects");
            scope.release(&self.simulator);
        }
    }
}

/// Reads one bounded JSONL request line.
///
/// Returns `Ok(None)` once the client has disconnected. A final line without
/// a trailing newline is still returned.
fn read_request_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut buffer = Vec::new();
    let limit = u64::try_from(MAX_REQUEST_BYTES + 1).unwrap_or(u64::MAX);
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }
    let content = buffer.strip_suffix(b"\n").map_or(buffer.len(), <[u8]>::len);
    if content > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(content, MAX_REQUEST_BYTES));
    }
    Ok(Some(buffer))
}
