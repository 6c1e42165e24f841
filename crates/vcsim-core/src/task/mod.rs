//! Task manager: asynchronous-operation handles and their lifecycle.
//!
//! Each task is a registry object of kind `Task` whose `info` property holds
//! a [`TaskInfo`]. Every transition goes through [`TaskManager::transition`],
//! which enforces the state machine, commits the new `info` atomically and
//! appends a snapshot to the task history. Commit and append happen under
//! one journal lock, so the history lists each task's states in commit
//! order. The `TaskManager` registry object
//! lists live and recently completed tasks in `recentTask`; completed tasks
//! beyond the configured limit are evicted oldest first.

mod info;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::fault::Fault;
use crate::history::HistoryStream;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::kinds;

pub use self::info::{TaskInfo, TaskState, TaskStateParseError};

const TASKS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tasks");

/// Cooperative cancellation flag shared with the code executing a task.
#[derive(Debug, Default)]
pub struct TaskControl {
    cancel_requested: AtomicBool,
}

impl TaskControl {
    /// Asks the executing code to stop at its next checkpoint.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

/// Parameters of a new task.
#[derive(Debug, Clone, Copy)]
pub struct NewTask<'a> {
    /// Object the task operates on.
    pub entity: &'a ObjectReference,
    /// Operation identifier, for example `VirtualMachine.powerOn`.
    pub description_id: &'a str,
    /// Who started the task.
    pub initiator: &'a str,
    /// Whether clients may cancel it.
    pub cancelable: bool,
}

/// Selects task snapshots for a history collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilterSpec {
    /// Only tasks operating on this object.
    #[serde(default)]
    pub entity: Option<ObjectReference>,
    /// Only snapshots in these states; empty accepts every state.
    #[serde(default, rename = "state")]
    pub states: Vec<TaskState>,
}

impl TaskFilterSpec {
    /// Returns true when `info` passes the filter.
    #[must_use]
    pub fn matches(&self, info: &TaskInfo) -> bool {
        let entity_matches = self
            .entity
            .as_ref()
            .is_none_or(|entity| &info.entity == entity);
        let state_matches = self.states.is_empty() || self.states.contains(&info.state);
        entity_matches && state_matches
    }
}

#[derive(Default)]
struct TaskBook {
    active: HashMap<ObjectReference, Arc<TaskControl>>,
    completed: VecDeque<ObjectReference>,
}

/// Creates tasks, drives their state machine and keeps the task history.
pub struct TaskManager {
    reference: ObjectReference,
    registry: Arc<Registry>,
    stream: HistoryStream<TaskInfo>,
    book: Mutex<TaskBook>,
    journal: Mutex<()>,
    history_limit: usize,
}

impl TaskManager {
    /// Creates the manager and registers its singleton object.
    ///
    /// `history_limit` bounds completed tasks kept in the inventory;
    /// `capacity` bounds snapshots kept in the task history.
    #[must_use]
    pub fn new(registry: Arc<Registry>, history_limit: usize, capacity: usize, page_size: usize) -> Self {
        let reference = ObjectReference::new(kinds::TASK_MANAGER, "TaskManager");
        registry.put(ManagedObject::new(reference.clone()).with("recentTask", Value::Array(Vec::new())));
        Self {
            reference,
            stream: HistoryStream::new(
                Arc::clone(&registry),
                kinds::TASK_HISTORY_COLLECTOR,
                capacity,
                page_size,
            ),
            registry,
            book: Mutex::new(TaskBook::default()),
            journal: Mutex::new(()),
            history_limit,
        }
    }

    /// Reference of the `TaskManager` singleton.
    #[must_use]
    pub const fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    /// Task history stream and its collectors.
    #[must_use]
    pub const fn stream(&self) -> &HistoryStream<TaskInfo> {
        &self.stream
    }

    fn lock_book(&self) -> MutexGuard<'_, TaskBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_journal(&self) -> MutexGuard<'_, ()> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a queued task for `request.entity`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entity does not exist.
    pub fn create_task(&self, request: NewTask<'_>) -> Result<ObjectReference, Fault> {
        let entity_name = self
            .registry
            .inspect(request.entity, |object| object.get_str("name").map(str::to_owned))?;
        let key = self.registry.allocate_id("task");
        let reference = ObjectReference::new(kinds::TASK, key.clone());
        let task_info = TaskInfo {
            key,
            task: reference.clone(),
            description_id: request.description_id.to_owned(),
            entity: request.entity.clone(),
            entity_name,
            initiator: request.initiator.to_owned(),
            state: TaskState::Queued,
            cancelable: request.cancelable,
            cancelled: false,
            progress: None,
            queue_time: OffsetDateTime::now_utc(),
            start_time: None,
            complete_time: None,
            result: None,
            error: None,
        };

        let mut object = ManagedObject::new(reference.clone());
        object.encode("info", &task_info)?;
        self.lock_book()
            .active
            .insert(reference.clone(), Arc::new(TaskControl::default()));
        {
            let _journal = self.lock_journal();
            self.registry.put(object);
            self.stream.append(task_info);
        }
        self.registry.mutate(&self.reference, |manager| {
            manager.add_to_set("recentTask", reference.to_value());
        })?;
        info!(
            target: TASKS_TARGET,
            task = %reference,
            entity = %request.entity,
            description = request.description_id,
            "task created"
        );
        Ok(reference)
    }

    /// Current `info` of a task.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown tasks.
    pub fn info(&self, task: &ObjectReference) -> Result<TaskInfo, Fault> {
        self.registry
            .inspect(task, |object| object.decode::<TaskInfo>("info"))?
    }

    /// Cancellation flag of an active task.
    #[must_use]
    pub fn control(&self, task: &ObjectReference) -> Option<Arc<TaskControl>> {
        self.lock_book().active.get(task).cloned()
    }

    /// Moves a task to `next`, recording `result` or `error` on completion.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown tasks, `NotSupported` for non-task objects,
    /// `InvalidState` when the state machine forbids the move.
    pub fn transition(
        &self,
        task: &ObjectReference,
        next: TaskState,
        result: Option<Value>,
        error: Option<Fault>,
    ) -> Result<TaskInfo, Fault> {
        if !task.is_kind(kinds::TASK) {
            return Err(Fault::not_supported(task.kind(), "setTaskState"));
        }
        let updated = {
            let _journal = self.lock_journal();
            let (_, updated) = self.registry.try_mutate(task, |object| {
                let mut task_info: TaskInfo = object.decode("info")?;
                task_info.transition(next, result, error)?;
                object.encode("info", &task_info)?;
                Ok(task_info)
            })?;
            self.stream.append(updated.clone());
            updated
        };
        debug!(target: TASKS_TARGET, task = %task, state = %next, "task transitioned");
        if next == TaskState::Cancelling {
            if let Some(control) = self.control(task) {
                control.request_cancel();
            }
        }
        if next.is_terminal() {
            self.retire(task);
            info!(target: TASKS_TARGET, task = %task, state = %next, "task completed");
        }
        Ok(updated)
    }

    /// Records progress of a running task.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` above 100, `InvalidState` unless running,
    /// `NotFound` for unknown tasks.
    pub fn update_progress(&self, task: &ObjectReference, percent: u8) -> Result<TaskInfo, Fault> {
        let (_, updated) = self.registry.try_mutate(task, |object| {
            let mut task_info: TaskInfo = object.decode("info")?;
            task_info.record_progress(percent)?;
            object.encode("info", &task_info)?;
            Ok(task_info)
        })?;
        Ok(updated)
    }

    /// Requests cancellation. A task already cancelling or finished is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// `NotSupported` for an active task that is not cancelable,
    /// `NotFound` for unknown tasks.
    pub fn cancel(&self, task: &ObjectReference) -> Result<(), Fault> {
        let current = self.info(task)?;
        if current.state.is_terminal() || current.state == TaskState::Cancelling {
            return Ok(());
        }
        if !current.cancelable {
            return Err(Fault::not_supported(kinds::TASK, "cancelTask"));
        }
        match self.transition(task, TaskState::Cancelling, None, None) {
            Ok(_) | Err(Fault::InvalidState { .. }) => Ok(()),
            Err(fault) => Err(fault),
        }
    }

    /// Tasks listed in the manager's `recentTask`.
    #[must_use]
    pub fn recent_tasks(&self) -> Vec<ObjectReference> {
        self.registry
            .inspect(&self.reference, |manager| manager.references("recentTask"))
            .unwrap_or_default()
    }

    /// Number of tasks not yet finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_book().active.len()
    }

    /// Asks every active task to stop.
    pub fn cancel_all(&self) {
        let active: Vec<ObjectReference> = self.lock_book().active.keys().cloned().collect();
        for task in active {
            if let Some(control) = self.control(&task) {
                control.request_cancel();
            }
            if let Err(fault) = self.cancel(&task) {
                debug!(target: TASKS_TARGET, task = %task, %fault, "task not cancelled");
            }
        }
    }

    /// Creates a history collector over task snapshots.
    pub fn create_collector(&self, filter: TaskFilterSpec) -> ObjectReference {
        self.stream.create_collector(move |task_info| filter.matches(task_info))
    }

    fn retire(&self, task: &ObjectReference) {
        let evicted: Vec<ObjectReference> = {
            let mut book = self.lock_book();
            book.active.remove(task);
            book.completed.push_back(task.clone());
            let excess = book.completed.len().saturating_sub(self.history_limit);
            book.completed.drain(..excess).collect()
        };
        for old in evicted {
            if self.registry.remove(&old).is_err() {
                debug!(target: TASKS_TARGET, task = %old, "evicted task already removed");
            }
            let unlisted = self.registry.mutate(&self.reference, |manager| {
                manager.remove_from_set("recentTask", &old.to_value());
            });
            if let Err(fault) = unlisted {
                debug!(target: TASKS_TARGET, task = %old, %fault, "task manager unavailable");
            }
            debug!(target: TASKS_TARGET, task = %old, "task evicted");
        }
    }
}
