//! Per-invocation context handed to handlers.

use std::sync::Arc;
use std::thread;

use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::services::Services;
use crate::task::{TaskControl, TaskState};

/// Who invoked which operation on which object.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Target object.
    pub target: &'a ObjectReference,
    /// Operation name as requested.
    pub operation: &'a str,
    /// User on whose behalf the call runs.
    pub initiator: &'a str,
}

/// Execution context of an asynchronous operation.
///
/// Handlers run on a worker thread and should call [`Self::checkpoint`]
/// between steps so cancellation takes effect promptly.
pub struct TaskContext {
    services: Arc<Services>,
    task: ObjectReference,
    target: ObjectReference,
    initiator: String,
    control: Arc<TaskControl>,
}

impl TaskContext {
    pub(crate) const fn new(
        services: Arc<Services>,
        task: ObjectReference,
        target: ObjectReference,
        initiator: String,
        control: Arc<TaskControl>,
    ) -> Self {
        Self {
            services,
            task,
            target,
            initiator,
            control,
        }
    }

    /// Engine components.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The task tracking this execution.
    #[must_use]
    pub const fn task(&self) -> &ObjectReference {
        &self.task
    }

    /// The object the operation was invoked on.
    #[must_use]
    pub const fn target(&self) -> &ObjectReference {
        &self.target
    }

    /// User on whose behalf the task runs.
    #[must_use]
    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancel_requested()
    }

    /// Stops the handler when cancellation was requested.
    ///
    /// # Errors
    ///
    /// `Cancelled` once the task is being cancelled.
    pub fn checkpoint(&self) -> Result<(), Fault> {
        if self.is_cancelled() {
            Err(Fault::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for the configured simulated work time, then checks for
    /// cancellation.
    ///
    /// # Errors
    ///
    /// `Cancelled` once the task is being cancelled.
    pub fn simulate_work(&self) -> Result<(), Fault> {
        self.checkpoint()?;
        let delay = self.services.settings.task_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.checkpoint()
    }

    /// Reports progress of the running task.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the task left the running state because it is being
    /// cancelled; other faults from the task manager otherwise.
    pub fn progress(&self, percent: u8) -> Result<(), Fault> {
        self.checkpoint()?;
        match self.services.tasks.update_progress(&self.task, percent) {
            Ok(_) => Ok(()),
            Err(Fault::InvalidState { .. }) if self.current_state() == Some(TaskState::Cancelling) => {
                Err(Fault::Cancelled)
            }
            Err(fault) => Err(fault),
        }
    }

    /// Applies a change to the target object.
    ///
    /// # Errors
    ///
    /// `NotFound` when the target vanished, or the closure's fault.
    pub fn mutate_target<R>(&self, change: impl FnOnce(&mut ManagedObject) -> Result<R, Fault>) -> Result<R, Fault> {
        self.services
            .registry
            .try_mutate(&self.target, change)
            .map(|(_, value)| value)
    }

    /// Removes the target if `condition` accepts its current state.
    ///
    /// No mutation of the target can commit between the check and the
    /// removal.
    ///
    /// # Errors
    ///
    /// `NotFound` when the target vanished, or the condition's fault.
    pub fn remove_target_if(
        &self,
        condition: impl FnOnce(&ManagedObject) -> Result<(), Fault>,
    ) -> Result<ManagedObject, Fault> {
        self.services.registry.remove_if(&self.target, condition)
    }

    /// Posts an event about the target on behalf of the initiator.
    pub fn post_event(&self, event_type: &str, message: impl Into<String>) {
        self.services
            .events
            .post(event_type, Some(&self.target), message, &self.initiator);
    }

    fn current_state(&self) -> Option<TaskState> {
        self.services
            .tasks
            .info(&self.task)
            .ok()
            .map(|task_info| task_info.state)
    }
}
