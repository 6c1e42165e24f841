//! In-memory managed-object engine for the vcsim simulator.
//!
//! The engine keeps a graph of typed managed objects and exposes the
//! primitives a virtualization-management client relies on:
//!
//! - [`Registry`] - versioned object storage with per-object locking
//! - [`PropertyCollector`] - property retrieval and long-poll change
//!   subscriptions (`waitForUpdates`)
//! - [`TaskManager`] - asynchronous-operation handles with a cooperative
//!   cancellation model
//! - [`HistoryCollector`] - paginated cursors over the task and event streams
//! - [`Dispatcher`] - routes `(object, operation, arguments)` calls to
//!   registered handlers
//!
//! [`Simulator`] assembles these around an inventory built from a [`Model`].
//!
//! # Example
//!
//! ```ignore
//! use vcsim_core::{Arguments, Model, Simulator, SimulatorSettings};
//!
//! let simulator = Simulator::with_model(SimulatorSettings::default(), &Model::vpx(1, 1, 1))?;
//! let vm = simulator.registry().list("VirtualMachine").remove(0);
//! let outcome = simulator.invoke(&vm, "powerOnVM", &Arguments::new())?;
//! ```

pub mod collector;
pub mod dispatch;
mod event;
mod fault;
pub mod history;
pub mod model;
mod object;
mod reference;
mod registry;
pub mod schema;
mod services;
mod simulator;
pub mod task;

pub use collector::{FilterHandle, PropertyCollector, WaitOptions};
pub use dispatch::{Arguments, Dispatcher, Invocation, Outcome, TaskContext};
pub use event::{Event, EventFilterSpec, EventManager};
pub use fault::Fault;
pub use history::{HistoryCollector, HistoryStream};
pub use model::{Model, ModelCount};
pub use object::ManagedObject;
pub use reference::{ObjectReference, ReferenceParseError};
pub use registry::{MutationObserver, Registry, RegistryChange};
pub use schema::{Catalog, FieldType, Schema, kinds};
pub use services::Services;
pub use simulator::{Simulator, SimulatorSettings};
pub use task::{NewTask, TaskControl, TaskFilterSpec, TaskInfo, TaskManager, TaskState};

#[cfg(test)]
mod tests;
