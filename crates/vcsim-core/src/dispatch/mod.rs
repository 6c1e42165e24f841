//! Method dispatch: routes `(object, operation, arguments)` to handlers.
//!
//! Handlers are registered per `(kind, operation)` pair. A call is checked in
//! a fixed order: the target must exist (`NotFound`), then the operation must
//! be registered for its kind (`NotSupported`). Synchronous handlers run on
//! the calling thread; asynchronous ones are wrapped in a task and executed
//! on a worker thread while the caller receives the task reference. A handler
//! that panics is reported as an `OperationFault`.

mod arguments;
mod builtin;
mod context;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, warn};

use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::services::Services;
use crate::task::{NewTask, TaskState};

pub use self::arguments::Arguments;
pub use self::context::{Invocation, TaskContext};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Changes the target atomically; nothing is committed on error.
///
/// Runs while the target's lock is held, so it must not call back into the
/// registry.
pub type MutationFn = dyn Fn(&Services, &mut ManagedObject, &Arguments) -> Result<Value, Fault> + Send + Sync;
/// Runs without holding the target's lock, for operations on engine services.
pub type ServiceFn = dyn Fn(&Services, &Invocation<'_>, &Arguments) -> Result<Value, Fault> + Send + Sync;
/// Runs on a worker thread, tracked by a task.
pub type TaskFn = dyn Fn(&TaskContext, &Arguments) -> Result<Value, Fault> + Send + Sync;

/// A registered operation implementation.
#[derive(Clone)]
pub enum Handler {
    /// Synchronous atomic change.
    Mutation(Arc<MutationFn>),
    /// Synchronous call into engine services.
    Service(Arc<ServiceFn>),
    /// Asynchronous operation.
    Task {
        /// Handler body.
        run: Arc<TaskFn>,
        /// Whether clients may cancel the task.
        cancelable: bool,
    },
}

/// Result of a dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Synchronous result.
    Value(Value),
    /// Handle of the task running the operation.
    Task(ObjectReference),
}

impl Outcome {
    /// The synchronous result, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Task(_) => None,
        }
    }

    /// The task reference, if the call was asynchronous.
    #[must_use]
    pub const fn task(&self) -> Option<&ObjectReference> {
        match self {
            Self::Task(task) => Some(task),
            Self::Value(_) => None,
        }
    }
}

/// Routes calls to registered handlers.
pub struct Dispatcher {
    services: Arc<Services>,
    handlers: HashMap<(String, String), Handler>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Dispatcher with no operations registered.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            handlers: HashMap::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Dispatcher with the built-in inventory, task, event and collector
    /// operations.
    #[must_use]
    pub fn with_builtins(services: Arc<Services>) -> Self {
        let mut dispatcher = Self::new(services);
        builtin::register(&mut dispatcher);
        dispatcher
    }

    /// Engine components handlers see.
    #[must_use]
    pub const fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Registers `handler` for `operation` on `kind`, replacing any previous
    /// registration.
    pub fn register(&mut self, kind: &str, operation: &str, handler: Handler) {
        self.handlers
            .insert((kind.to_owned(), operation.to_owned()), handler);
    }

    /// Registers a synchronous atomic change.
    pub fn register_mutation(
        &mut self,
        kind: &str,
        operation: &str,
        handler: impl Fn(&Services, &mut ManagedObject, &Arguments) -> Result<Value, Fault> + Send + Sync + 'static,
    ) {
        self.register(kind, operation, Handler::Mutation(Arc::new(handler)));
    }

    /// Registers a synchronous call into engine services.
    pub fn register_service(
        &mut self,
        kind: &str,
        operation: &str,
        handler: impl Fn(&Services, &Invocation<'_>, &Arguments) -> Result<Value, Fault> + Send + Sync + 'static,
    ) {
        self.register(kind, operation, Handler::Service(Arc::new(handler)));
    }

    /// Registers an asynchronous operation.
    pub fn register_task(
        &mut self,
        kind: &str,
        operation: &str,
        cancelable: bool,
        handler: impl Fn(&TaskContext, &Arguments) -> Result<Value, Fault> + Send + Sync + 'static,
    ) {
        self.register(
            kind,
            operation,
            Handler::Task {
                run: Arc::new(handler),
                cancelable,
            },
        );
    }

    /// Makes `alias` invoke the handler registered as `operation`.
    /// Returns false when `operation` is not registered for `kind`.
    pub fn alias(&mut self, kind: &str, alias: &str, operation: &str) -> bool {
        let Some(handler) = self
            .handlers
            .get(&(kind.to_owned(), operation.to_owned()))
            .cloned()
        else {
            return false;
        };
        self.register(kind, alias, handler);
        true
    }

    /// Returns true when `operation` is registered for `kind`.
    #[must_use]
    pub fn supports(&self, kind: &str, operation: &str) -> bool {
        self.handlers
            .contains_key(&(kind.to_owned(), operation.to_owned()))
    }

    /// Operation names registered for `kind`, sorted.
    #[must_use]
    pub fn operations(&self, kind: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .filter(|(registered, _)| registered == kind)
            .map(|(_, operation)| operation.clone())
            .collect();
        names.sort();
        names
    }

    /// Invokes `operation` on `obj` on behalf of the configured default user.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown objects, `NotSupported` for unregistered
    /// operations, or the handler's fault.
    pub fn dispatch(&self, obj: &ObjectReference, operation: &str, arguments: &Arguments) -> Result<Outcome, Fault> {
        let initiator = self.services.settings.initiator.clone();
        self.dispatch_as(&initiator, obj, operation, arguments)
    }

    /// Invokes `operation` on `obj` on behalf of `initiator`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown objects, `NotSupported` for unregistered
    /// operations, or the handler's fault.
    pub fn dispatch_as(
        &self,
        initiator: &str,
        obj: &ObjectReference,
        operation: &str,
        arguments: &Arguments,
    ) -> Result<Outcome, Fault> {
        if !self.services.registry.contains(obj) {
            return Err(Fault::not_found(obj));
        }
        let handler = self
            .handlers
            .get(&(obj.kind().to_owned(), operation.to_owned()))
            .ok_or_else(|| Fault::not_supported(obj.kind(), operation))?;
        debug!(target: DISPATCH_TARGET, object = %obj, operation, "dispatching");
        let services = self.services.as_ref();
        match handler {
            Handler::Mutation(mutation) => self
                .services
                .registry
                .try_mutate(obj, |object| guarded(operation, || mutation(services, object, arguments)))
                .map(|(_, value)| Outcome::Value(value)),
            Handler::Service(service) => {
                let invocation = Invocation {
                    target: obj,
                    operation,
                    initiator,
                };
                guarded(operation, || service(services, &invocation, arguments)).map(Outcome::Value)
            }
            Handler::Task { run, cancelable } => self
                .spawn_task(initiator, obj, operation, Arc::clone(run), *cancelable, arguments)
                .map(Outcome::Task),
        }
    }

    fn spawn_task(
        &self,
        initiator: &str,
        obj: &ObjectReference,
        operation: &str,
        run: Arc<TaskFn>,
        cancelable: bool,
        arguments: &Arguments,
    ) -> Result<ObjectReference, Fault> {
        let description_id = format!("{}.{operation}", obj.kind());
        let tasks = &self.services.tasks;
        let task = tasks.create_task(NewTask {
            entity: obj,
            description_id: &description_id,
            initiator,
            cancelable,
        })?;
        let control = tasks
            .control(&task)
            .ok_or_else(|| Fault::invalid_state(format!("task {task} is not active")))?;
        let context = TaskContext::new(
            Arc::clone(&self.services),
            task.clone(),
            obj.clone(),
            initiator.to_owned(),
            control,
        );
        let owned_arguments = arguments.clone();
        let operation_name = operation.to_owned();
        let spawned = thread::Builder::new()
            .name(format!("vcsim-{}", task.id()))
            .spawn(move || run_task(&context, run.as_ref(), &owned_arguments, &operation_name));
        match spawned {
            Ok(handle) => {
                let mut workers = self.lock_workers();
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, task = %task, %error, "failed to start worker");
                let fault = Fault::operation("WorkerUnavailable", error.to_string());
                let failed = tasks
                    .transition(&task, TaskState::Running, None, None)
                    .and_then(|_| tasks.transition(&task, TaskState::Error, None, Some(fault)));
                if let Err(transition_fault) = failed {
                    warn!(target: DISPATCH_TARGET, task = %task, fault = %transition_fault, "task left unfinished");
                }
            }
        }
        Ok(task)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of worker threads still running.
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.lock_workers()
            .iter()
            .filter(|worker| !worker.is_finished())
            .count()
    }

    /// Waits for every worker thread to finish.
    pub fn join_workers(&self) {
        let workers: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!(target: DISPATCH_TARGET, "worker thread panicked");
            }
        }
    }
}

fn run_task(context: &TaskContext, run: &TaskFn, arguments: &Arguments, operation: &str) {
    let tasks = &context.services().tasks;
    let task = context.task();
    let outcome = match tasks.transition(task, TaskState::Running, None, None) {
        Ok(_) => guarded(operation, || {
            context.checkpoint()?;
            run(context, arguments)
        }),
        Err(_) if context.is_cancelled() => Err(Fault::Cancelled),
        Err(fault) => Err(fault),
    };
    let finished = match outcome {
        Ok(result) => tasks.transition(task, TaskState::Success, Some(result), None),
        Err(fault) => {
            debug!(target: DISPATCH_TARGET, task = %task, %fault, "task failed");
            tasks.transition(task, TaskState::Error, None, Some(fault))
        }
    };
    if let Err(fault) = finished {
        warn!(target: DISPATCH_TARGET, task = %task, %fault, "task left unfinished");
    }
}

fn guarded<R>(operation: &str, call: impl FnOnce() -> Result<R, Fault>) -> Result<R, Fault> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(target: DISPATCH_TARGET, operation, message, "handler panicked");
        Err(Fault::operation(
            "HandlerPanicked",
            format!("handler for '{operation}' panicked: {message}"),
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests;
