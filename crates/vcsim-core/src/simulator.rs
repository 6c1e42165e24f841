//! Simulator lifecycle: assembles the engine and tears it down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;
use vcsim_config::{Config, ModelKind};

use crate::collector::PropertyCollector;
use crate::dispatch::{Arguments, Dispatcher, Outcome};
use crate::event::EventManager;
use crate::fault::Fault;
use crate::model::{self, Model};
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::{Catalog, kinds};
use crate::services::Services;
use crate::task::TaskManager;

const SIMULATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::simulator");

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSettings {
    /// Inventory flavour advertised by the service instance.
    pub flavour: ModelKind,
    /// Completed tasks kept in the inventory.
    pub task_history_limit: usize,
    /// Items retained per history stream.
    pub history_capacity: usize,
    /// Initial page size of new history collectors.
    pub default_page_size: usize,
    /// Simulated work per asynchronous operation step.
    pub task_delay: Duration,
    /// Longest a collector wait may block.
    pub max_wait: Duration,
    /// User recorded on tasks and events when the caller names none.
    pub initiator: String,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SimulatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            flavour: config.model(),
            task_history_limit: widen(config.task_history_limit),
            history_capacity: widen(config.history_capacity),
            default_page_size: widen(config.default_page_size),
            task_delay: config.task_delay(),
            max_wait: config.max_wait(),
            initiator: "vcsim".to_owned(),
        }
    }
}

fn widen(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// A running simulator instance.
///
/// Instances are independent; several may coexist in one process.
pub struct Simulator {
    services: Arc<Services>,
    dispatcher: Dispatcher,
    root_folder: ObjectReference,
    service_instance: ObjectReference,
    shut_down: AtomicBool,
}

impl Simulator {
    /// Starts a simulator with the singleton objects and an empty root
    /// folder.
    #[must_use]
    pub fn new(settings: SimulatorSettings) -> Self {
        let services = Arc::new(Services::new(settings));
        let registry = &services.registry;

        let root = model::root_folder();
        let root_folder = root.reference().clone();
        registry.put(root);
        let collector_object = ObjectReference::new(kinds::PROPERTY_COLLECTOR, "propertyCollector");
        registry.put(ManagedObject::new(collector_object.clone()));

        let service_instance = ObjectReference::new(kinds::SERVICE_INSTANCE, "ServiceInstance");
        let flavour = services.settings.flavour;
        registry.put(
            ManagedObject::new(service_instance.clone())
                .with_reference("content.rootFolder", &root_folder)
                .with_reference("content.propertyCollector", &collector_object)
                .with_reference("content.taskManager", services.tasks.reference())
                .with_reference("content.eventManager", services.events.reference())
                .with("about.name", "vcsim")
                .with("about.apiType", flavour.api_type())
                .with("about.version", env!("CARGO_PKG_VERSION")),
        );

        let dispatcher = Dispatcher::with_builtins(Arc::clone(&services));
        info!(target: SIMULATOR_TARGET, %flavour, "simulator started");
        Self {
            services,
            dispatcher,
            root_folder,
            service_instance,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Starts a simulator and builds `model` under the root folder.
    ///
    /// # Errors
    ///
    /// Propagates faults raised while building the inventory.
    pub fn with_model(settings: SimulatorSettings, model: &Model) -> Result<Self, Fault> {
        let simulator = Self::new(settings);
        model.create(simulator.registry(), &simulator.root_folder)?;
        Ok(simulator)
    }

    /// Engine components shared with handlers.
    #[must_use]
    pub const fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Object storage.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.services.registry
    }

    /// Property schemas.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.services.catalog
    }

    /// Property collector.
    #[must_use]
    pub fn property_collector(&self) -> &Arc<PropertyCollector> {
        &self.services.collector
    }

    /// Task manager.
    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.services.tasks
    }

    /// Event manager.
    #[must_use]
    pub fn events(&self) -> &Arc<EventManager> {
        &self.services.events
    }

    /// Operation table.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Root of the inventory tree.
    #[must_use]
    pub const fn root_folder(&self) -> &ObjectReference {
        &self.root_folder
    }

    /// The `ServiceInstance` singleton.
    #[must_use]
    pub const fn service_instance(&self) -> &ObjectReference {
        &self.service_instance
    }

    /// Invokes an operation on behalf of the default user.
    ///
    /// # Errors
    ///
    /// Faults from [`Dispatcher::dispatch`].
    pub fn invoke(&self, obj: &ObjectReference, operation: &str, arguments: &Arguments) -> Result<Outcome, Fault> {
        self.dispatcher.dispatch(obj, operation, arguments)
    }

    /// Returns true once [`Self::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops the simulator: cancels running tasks, wakes every suspended
    /// waiter with `Cancelled`, waits for task workers and releases every
    /// object. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.services.tasks.cancel_all();
        self.services.collector.destroy_all();
        self.services.tasks.stream().destroy_all();
        self.services.events.stream().destroy_all();
        self.dispatcher.join_workers();
        self.services.registry.clear();
        info!(target: SIMULATOR_TARGET, "simulator stopped");
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
