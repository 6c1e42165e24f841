//! Property collector: one-shot retrieval and incremental change delivery.
//!
//! Clients describe what they want with a [`PropertyFilterSpec`]: starting
//! objects, traversals to follow from them, and the property paths to report
//! per kind. [`PropertyCollector::retrieve_properties`] evaluates the spec
//! once. [`PropertyCollector::create_filter`] registers it; subsequent
//! [`PropertyCollector::wait_for_updates`] calls block until a requested
//! property changes and return only the difference.
//!
//! ## Version tokens
//!
//! Every non-empty update set carries a fresh token. Passing a token to the
//! next wait acknowledges it. A client that lost a response retries with the
//! previous token and receives the same changes again, recomputed. Any other
//! token is rejected with `InvalidCollectorVersion`.
//!
//! ## Wake-ups
//!
//! The collector observes the registry. A filter without traversals is woken
//! only by changes to its starting objects; a filter with traversals is woken
//! by every change, since any object may enter its view. Waiters never hold
//! an object lock while blocked.

mod filter;
mod snapshot;
mod spec;
mod traverse;
mod update;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use self::filter::{INITIAL_VERSION, PropertyFilter, Wake};
use self::snapshot::{Snapshot, validate};
use self::traverse::Roots;
use crate::fault::Fault;
use crate::reference::ObjectReference;
use crate::registry::{MutationObserver, Registry, RegistryChange};
use crate::schema::{Catalog, kinds};

pub use self::spec::{ObjectSpec, PropertyFilterSpec, PropertySpec, SelectionSpec, TraversalSpec};
pub use self::update::{
    ChangeOp, DynamicProperty, ObjectContent, ObjectUpdate, ObjectUpdateKind, PropertyChange,
    PropertyValue, UpdateSet,
};

const COLLECTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::collector");

/// Handle returned when a filter is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterHandle {
    /// Reference naming the filter in later calls.
    pub filter: ObjectReference,
    /// Token of the creation baseline; waiting with it reports changes made
    /// after the filter was created.
    pub version: u64,
}

/// Bounds on a blocking wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// Longest time to block. `None` waits until a change or cancellation.
    pub max_wait: Option<Duration>,
}

impl WaitOptions {
    /// Blocks until a change arrives or the filter is destroyed.
    #[must_use]
    pub const fn indefinitely() -> Self {
        Self { max_wait: None }
    }

    /// Blocks for at most `max_wait`.
    #[must_use]
    pub const fn at_most(max_wait: Duration) -> Self {
        Self {
            max_wait: Some(max_wait),
        }
    }

    /// Never blocks.
    #[must_use]
    pub const fn immediate() -> Self {
        Self::at_most(Duration::ZERO)
    }
}

/// Evaluates property specs and tracks registered filters.
pub struct PropertyCollector {
    registry: Arc<Registry>,
    catalog: Arc<Catalog>,
    filters: RwLock<HashMap<ObjectReference, Arc<PropertyFilter>>>,
}

impl PropertyCollector {
    /// Creates a collector and subscribes it to registry changes.
    #[must_use]
    pub fn new(registry: Arc<Registry>, catalog: Arc<Catalog>) -> Arc<Self> {
        let collector = Arc::new(Self {
            registry,
            catalog,
            filters: RwLock::new(HashMap::new()),
        });
        let observer: Weak<dyn MutationObserver> = Arc::downgrade(&collector) as Weak<dyn MutationObserver>;
        collector.registry.subscribe(observer);
        collector
    }

    /// Evaluates each spec once and returns the matching objects' values.
    ///
    /// An object reached by several specs is reported once.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing starting object, `InvalidProperty` for an
    /// undeclared path, `InvalidArgument` for a broken or cyclic traversal.
    pub fn retrieve_properties(&self, specs: &[PropertyFilterSpec]) -> Result<Vec<ObjectContent>, Fault> {
        let mut contents: Vec<ObjectContent> = Vec::new();
        for spec in specs {
            validate(&self.catalog, spec)?;
            let snapshot = Snapshot::capture(&self.registry, &self.catalog, spec, Roots::Required, None)?;
            for content in snapshot.into_contents() {
                if !contents.iter().any(|existing| existing.obj == content.obj) {
                    contents.push(content);
                }
            }
        }
        Ok(contents)
    }

    /// Retrieves `paths` of a single object.
    ///
    /// # Errors
    ///
    /// `NotFound` when the object does not exist, `InvalidProperty` for an
    /// undeclared path.
    pub fn retrieve_one<I, S>(&self, obj: &ObjectReference, paths: I) -> Result<ObjectContent, Fault>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = PropertyFilterSpec::for_object(obj, paths);
        self.retrieve_properties(std::slice::from_ref(&spec))?
            .into_iter()
            .next()
            .ok_or_else(|| Fault::not_found(obj))
    }

    /// Registers a filter and records its creation baseline.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::retrieve_properties`] when the spec is invalid.
    pub fn create_filter(&self, spec: PropertyFilterSpec) -> Result<FilterHandle, Fault> {
        validate(&self.catalog, &spec)?;
        let snapshot = Snapshot::capture(&self.registry, &self.catalog, &spec, Roots::Required, None)?;
        let reference = ObjectReference::new(kinds::PROPERTY_FILTER, self.registry.allocate_id("filter"));
        let filter = Arc::new(PropertyFilter::new(reference.clone(), spec, snapshot));
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone(), filter);
        debug!(target: COLLECTOR_TARGET, filter = %reference, "filter created");
        Ok(FilterHandle {
            filter: reference,
            version: INITIAL_VERSION,
        })
    }

    /// Waits for changes to the filter's requested properties.
    ///
    /// Without a token every object in view is returned as entering. With a
    /// token the call returns as soon as something changed relative to it,
    /// or an empty update set carrying the same token once `max_wait`
    /// elapses.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown filter, `InvalidCollectorVersion` for an
    /// unrecognised token, `Cancelled` when the filter is destroyed while the
    /// call is blocked.
    pub fn wait_for_updates(
        &self,
        filter: &ObjectReference,
        since: Option<u64>,
        options: WaitOptions,
    ) -> Result<UpdateSet, Fault> {
        let registered = self.filter(filter)?;
        let Some(token) = since else {
            return registered.full_update(&self.registry, &self.catalog);
        };
        let deadline = options.max_wait.map(|max_wait| Instant::now() + max_wait);
        loop {
            let observed = registered.signal.observe()?;
            if let Some(update) = registered.poll(&self.registry, &self.catalog, token)? {
                trace!(
                    target: COLLECTOR_TARGET,
                    filter = %filter,
                    version = update.version,
                    objects = update.object_set.len(),
                    "delivering updates"
                );
                return Ok(update);
            }
            match registered.signal.wait_past(observed, deadline) {
                Wake::Changed => {}
                Wake::TimedOut => {
                    return Ok(UpdateSet {
                        version: token,
                        object_set: Vec::new(),
                    });
                }
                Wake::Cancelled => return Err(Fault::Cancelled),
            }
        }
    }

    /// Non-blocking variant of [`Self::wait_for_updates`].
    ///
    /// # Errors
    ///
    /// As for [`Self::wait_for_updates`].
    pub fn check_for_updates(&self, filter: &ObjectReference, since: Option<u64>) -> Result<UpdateSet, Fault> {
        self.wait_for_updates(filter, since, WaitOptions::immediate())
    }

    /// Destroys a filter, waking any blocked waiter with `Cancelled`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the filter does not exist.
    pub fn destroy_filter(&self, filter: &ObjectReference) -> Result<(), Fault> {
        let removed = self
            .filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(filter)
            .ok_or_else(|| Fault::not_found(filter))?;
        removed.signal.cancel();
        debug!(target: COLLECTOR_TARGET, filter = %filter, "filter destroyed");
        Ok(())
    }

    /// Destroys every filter.
    pub fn destroy_all(&self) {
        let drained: Vec<Arc<PropertyFilter>> = self
            .filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, filter)| filter)
            .collect();
        for filter in &drained {
            filter.signal.cancel();
        }
        if !drained.is_empty() {
            debug!(target: COLLECTOR_TARGET, count = drained.len(), "filters destroyed");
        }
    }

    /// Number of registered filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn filter(&self, reference: &ObjectReference) -> Result<Arc<PropertyFilter>, Fault> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| Fault::not_found(reference))
    }
}

impl MutationObserver for PropertyCollector {
    fn object_changed(&self, change: &RegistryChange) {
        let filters = self.filters.read().unwrap_or_else(PoisonError::into_inner);
        for filter in filters.values() {
            if filter.watches(change.reference()) {
                trace!(
                    target: COLLECTOR_TARGET,
                    filter = %filter.reference(),
                    object = %change.reference(),
                    "waking filter"
                );
                filter.signal.notify();
            }
        }
    }
}

#[cfg(test)]
mod tests;
