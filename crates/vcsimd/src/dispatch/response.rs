//! Response serialization helpers for the dispatch loop.
//!
//! This module provides the `Response` type and `ResponseWriter` helper for
//! writing one JSONL line per request back to the client.

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

use vcsim_core::{Fault, ObjectReference};

use super::errors::DispatchError;

/// A fault plus its rendered message.
#[derive(Debug, Serialize)]
pub struct FaultBody {
    /// The structured fault, tagged by its `fault` discriminator.
    #[serde(flatten)]
    pub fault: Fault,
    /// Human-readable rendering of the fault.
    pub message: String,
}

/// Response messages sent to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// The request completed synchronously.
    Result {
        /// Method result.
        value: Value,
    },
    /// The request started an asynchronous operation.
    Task {
        /// Reference of the task tracking it.
        task: ObjectReference,
    },
    /// The engine rejected the request.
    Fault {
        /// Structured fault.
        fault: FaultBody,
    },
    /// The daemon could not interpret the request.
    Error {
        /// Description of the problem.
        message: String,
    },
}

impl Response {
    /// Creates a result response.
    pub fn result(value: Value) -> Self {
        Self::Result { value }
    }

    /// Creates a task response.
    pub fn task(task: ObjectReference) -> Self {
        Self::Task { task }
    }

    /// Creates a fault response.
    pub fn fault(fault: Fault) -> Self {
        let message = fault.to_string();
        Self::Fault {
            fault: FaultBody { fault, message },
        }
    }

    /// Creates an error response describing a dispatch failure.
    pub fn error(error: &DispatchError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

/// Writer that serializes responses to a stream.
///
/// Each response is written as a single line and flushed immediately so a
/// client blocked on the read sees it without waiting for later traffic.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a new response writer wrapping the given output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a response as a JSONL line and flushes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, writing or flushing fails.
    pub fn write_response(&mut self, response: &Response) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, response)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Writes an error response for a dispatch failure.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_error(&mut self, error: &DispatchError) -> Result<(), DispatchError> {
        self.write_response(&Response::error(error))
    }
}
