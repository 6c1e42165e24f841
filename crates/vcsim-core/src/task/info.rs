//! Task state machine and the `info` record stored on each task object.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::fault::Fault;
use crate::reference::ObjectReference;

/// Lifecycle state of a task.
///
/// ```text
/// queued -> running -> success | error
/// queued | running -> cancelling -> success | error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    /// Created but not started.
    Queued,
    /// Executing.
    Running,
    /// Cancellation requested; the handler has not yet stopped.
    Cancelling,
    /// Finished with a result.
    Success,
    /// Finished with a fault.
    Error,
}

impl TaskState {
    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Returns true for `success` and `error`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns true when the state machine permits moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Cancelling)
                | (Self::Running, Self::Cancelling | Self::Success | Self::Error)
                | (Self::Cancelling, Self::Success | Self::Error)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown task state name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task state '{0}'")]
pub struct TaskStateParseError(String);

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "cancelling" => Ok(Self::Cancelling),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(TaskStateParseError(other.to_owned())),
        }
    }
}

/// Snapshot of a task, stored as the task object's `info` property and
/// appended to the task history on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task identifier.
    pub key: String,
    /// Reference of the task object.
    pub task: ObjectReference,
    /// Operation the task performs, for example `VirtualMachine.powerOn`.
    pub description_id: String,
    /// Object the task operates on.
    pub entity: ObjectReference,
    /// Name of the entity when the task was created.
    #[serde(default)]
    pub entity_name: Option<String>,
    /// Who started the task.
    pub initiator: String,
    /// Current state.
    pub state: TaskState,
    /// Whether cancellation may be requested.
    pub cancelable: bool,
    /// Whether cancellation was requested.
    pub cancelled: bool,
    /// Percentage complete while running.
    #[serde(default)]
    pub progress: Option<u8>,
    /// When the task was created.
    #[serde(with = "time::serde::rfc3339")]
    pub queue_time: OffsetDateTime,
    /// When the task started running.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    /// When the task reached a terminal state.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub complete_time: Option<OffsetDateTime>,
    /// Result value of a successful task.
    #[serde(default)]
    pub result: Option<Value>,
    /// Fault of a failed task.
    #[serde(default)]
    pub error: Option<Fault>,
}

impl TaskInfo {
    /// Applies a state transition, stamping times and outcome.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the transition is not permitted.
    pub fn transition(
        &mut self,
        next: TaskState,
        result: Option<Value>,
        error: Option<Fault>,
    ) -> Result<(), Fault> {
        if !self.state.can_transition_to(next) {
            return Err(Fault::invalid_state(format!(
                "task {} cannot move from {} to {next}",
                self.key, self.state
            )));
        }
        let now = OffsetDateTime::now_utc();
        match next {
            TaskState::Running => {
                self.start_time = Some(now);
                self.progress = Some(0);
            }
            TaskState::Cancelling => self.cancelled = true,
            TaskState::Success => {
                self.complete_time = Some(now);
                self.progress = Some(100);
                self.result = result;
            }
            TaskState::Error => {
                self.complete_time = Some(now);
                self.error = error;
            }
            TaskState::Queued => {}
        }
        self.state = next;
        Ok(())
    }

    /// Records progress of a running task.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` above 100, `InvalidState` unless running.
    pub fn record_progress(&mut self, percent: u8) -> Result<(), Fault> {
        if percent > 100 {
            return Err(Fault::invalid_argument(
                "percentDone",
                format!("{percent} is not between 0 and 100"),
            ));
        }
        if self.state != TaskState::Running {
            return Err(Fault::invalid_state(format!(
                "task {} is {} and cannot report progress",
                self.key, self.state
            )));
        }
        self.progress = Some(percent);
        Ok(())
    }
}
