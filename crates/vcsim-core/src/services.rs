//! Engine components shared with operation handlers.

use std::sync::Arc;

use crate::collector::PropertyCollector;
use crate::event::EventManager;
use crate::registry::Registry;
use crate::schema::Catalog;
use crate::simulator::SimulatorSettings;
use crate::task::TaskManager;

/// Everything a handler may touch besides its target object.
pub struct Services {
    /// Object storage.
    pub registry: Arc<Registry>,
    /// Property schemas.
    pub catalog: Arc<Catalog>,
    /// Property collector and its filters.
    pub collector: Arc<PropertyCollector>,
    /// Task lifecycle and task history.
    pub tasks: Arc<TaskManager>,
    /// Event stream.
    pub events: Arc<EventManager>,
    /// Tunables the simulator was started with.
    pub settings: SimulatorSettings,
}

impl Services {
    /// Builds the engine components around a fresh registry.
    #[must_use]
    pub fn new(settings: SimulatorSettings) -> Self {
        let registry = Arc::new(Registry::new());
        let catalog = Arc::new(Catalog::builtin());
        let collector = PropertyCollector::new(Arc::clone(&registry), Arc::clone(&catalog));
        let tasks = Arc::new(TaskManager::new(
            Arc::clone(&registry),
            settings.task_history_limit,
            settings.history_capacity,
            settings.default_page_size,
        ));
        let events = Arc::new(EventManager::new(
            Arc::clone(&registry),
            settings.history_capacity,
            settings.default_page_size,
        ));
        Self {
            registry,
            catalog,
            collector,
            tasks,
            events,
            settings,
        }
    }
}
