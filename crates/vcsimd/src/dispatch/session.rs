//! Server-side objects owned by one client connection.
//!
//! Property filters and history collectors live until a client destroys
//! them. A client that disconnects without doing so would leak them, so the
//! connection records what it created and releases the leftovers when it
//! ends.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use vcsim_core::{Arguments, Fault, ObjectReference, Simulator, kinds};

use super::DISPATCH_TARGET;

const COLLECTOR_KINDS: [&str; 2] = [kinds::TASK_HISTORY_COLLECTOR, kinds::EVENT_HISTORY_COLLECTOR];

/// Filters and collectors created over one connection and not yet destroyed.
#[derive(Debug, Default)]
pub(crate) struct SessionScope {
    filters: BTreeSet<ObjectReference>,
    collectors: BTreeSet<ObjectReference>,
}

impl SessionScope {
    pub(crate) fn adopt_filter(&mut self, filter: ObjectReference) {
        self.filters.insert(filter);
    }

    pub(crate) fn forget_filter(&mut self, filter: &ObjectReference) {
        self.filters.remove(filter);
    }

    /// Records the result of an `invoke` when it names a new collector and
    /// forgets a collector the client destroyed.
    pub(crate) fn observe_invoke(&mut self, target: &ObjectReference, operation: &str, result: &Value) {
        if operation == "destroyCollector" {
            self.collectors.remove(target);
            return;
        }
        if let Some(created) = ObjectReference::from_value(result)
            && COLLECTOR_KINDS.iter().any(|kind| created.is_kind(kind))
        {
            self.collectors.insert(created);
        }
    }

    /// Objects still owned by the session.
    pub(crate) fn len(&self) -> usize {
        self.filters.len() + self.collectors.len()
    }

    /// Destroys every object the session still owns. Objects that are
    /// already gone, for example after simulator shutdown, are skipped.
    pub(crate) fn release(&mut self, simulator: &Simulator) {
        for filter in std::mem::take(&mut self.filters) {
            let destroyed = simulator.property_collector().destroy_filter(&filter);
            log_release(&filter, destroyed);
        }
        let dispatcher = simulator.dispatcher();
        for collector in std::mem::take(&mut self.collectors) {
            let destroyed = dispatcher
                .dispatch(&collector, "destroyCollector", &Arguments::new())
                .map(|_| ());
            log_release(&collector, destroyed);
        }
    }
}

fn log_release(object: &ObjectReference, outcome: Result<(), Fault>) {
    match outcome {
        Ok(()) => debug!(target: DISPATCH_TARGET, %object, "released on disconnect"),
        Err(fault) => debug!(target: DISPATCH_TARGET, %object, %fault, "already released"),
    }
}
