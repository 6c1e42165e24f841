//! Append-only history streams and the collectors that page through them.
//!
//! A [`HistoryStream`] owns a bounded [`HistoryLog`] plus every collector
//! created over it. Each collector is also a registry object whose
//! `latestPage` property is refreshed when a matching item is appended, so
//! clients can watch a collector through the property collector as well as
//! page through it. Appends and page publication share one lock, so a
//! collector object never shows a page older than one already published.

mod collector;
mod log;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;

pub use self::collector::{HistoryCollector, MAX_PAGE_SIZE};
pub use self::log::HistoryLog;

const HISTORY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::history");

/// A history log plus its registered collectors.
pub struct HistoryStream<T> {
    registry: Arc<Registry>,
    log: Arc<HistoryLog<T>>,
    collector_kind: &'static str,
    default_page_size: usize,
    collectors: RwLock<HashMap<ObjectReference, Arc<HistoryCollector<T>>>>,
    publishing: Mutex<()>,
}

impl<T> HistoryStream<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Creates a stream retaining `capacity` items whose collectors are
    /// registry objects of `collector_kind`.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        collector_kind: &'static str,
        capacity: usize,
        default_page_size: usize,
    ) -> Self {
        Self {
            registry,
            log: Arc::new(HistoryLog::new(capacity)),
            collector_kind,
            default_page_size,
            collectors: RwLock::new(HashMap::new()),
            publishing: Mutex::new(()),
        }
    }

    /// The underlying log.
    #[must_use]
    pub const fn log(&self) -> &Arc<HistoryLog<T>> {
        &self.log
    }

    /// Appends an item and refreshes the `latestPage` of matching collectors.
    pub fn append(&self, item: T) {
        let _publishing = self.lock_publishing();
        let interested: Vec<Arc<HistoryCollector<T>>> = self
            .collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|collector| collector.matches(&item))
            .cloned()
            .collect();
        self.log.append(item);
        for collector in interested {
            self.publish(&collector);
        }
    }

    /// Creates a collector over items accepted by `filter`.
    pub fn create_collector(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> ObjectReference {
        let reference = ObjectReference::new(self.collector_kind, self.registry.allocate_id("collector"));
        let collector = Arc::new(HistoryCollector::new(
            reference.clone(),
            Arc::clone(&self.log),
            Box::new(filter),
            self.default_page_size,
        ));
        let _publishing = self.lock_publishing();
        self.registry.put(
            ManagedObject::new(reference.clone())
                .with("pageSize", collector.page_size())
                .with("latestPage", page_value(&collector.latest_page())),
        );
        self.collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone(), collector);
        debug!(target: HISTORY_TARGET, collector = %reference, "history collector created");
        reference
    }

    /// Looks up a collector.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or destroyed collectors.
    pub fn collector(&self, reference: &ObjectReference) -> Result<Arc<HistoryCollector<T>>, Fault> {
        self.collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| Fault::not_found(reference))
    }

    /// Changes a collector's page size and refreshes its `latestPage`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown collectors, `InvalidArgument` for bad sizes.
    pub fn set_page_size(&self, reference: &ObjectReference, page_size: usize) -> Result<(), Fault> {
        let collector = self.collector(reference)?;
        let _publishing = self.lock_publishing();
        collector.set_page_size(page_size)?;
        self.publish(&collector);
        Ok(())
    }

    /// Destroys a collector, removing its registry object and waking
    /// blocked readers.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown collectors.
    pub fn destroy_collector(&self, reference: &ObjectReference) -> Result<(), Fault> {
        let collector = self
            .collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reference)
            .ok_or_else(|| Fault::not_found(reference))?;
        collector.destroy();
        // The registry object may already be gone during shutdown.
        if self.registry.remove(reference).is_err() {
            debug!(target: HISTORY_TARGET, collector = %reference, "collector object already removed");
        }
        debug!(target: HISTORY_TARGET, collector = %reference, "history collector destroyed");
        Ok(())
    }

    /// Destroys every collector.
    pub fn destroy_all(&self) {
        let drained: Vec<Arc<HistoryCollector<T>>> = self
            .collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, collector)| collector)
            .collect();
        for collector in drained {
            collector.destroy();
            if self.registry.remove(collector.reference()).is_err() {
                debug!(target: HISTORY_TARGET, collector = %collector.reference(), "collector object already removed");
            }
        }
    }

    /// Number of live collectors.
    #[must_use]
    pub fn collector_count(&self) -> usize {
        self.collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_publishing(&self) -> MutexGuard<'_, ()> {
        self.publishing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, collector: &HistoryCollector<T>) {
        let page = page_value(&collector.latest_page());
        let page_size = collector.page_size();
        let published = self.registry.mutate(collector.reference(), |object| {
            object.set("latestPage", page);
            object.set("pageSize", page_size);
        });
        if let Err(fault) = published {
            warn!(
                target: HISTORY_TARGET,
                collector = %collector.reference(),
                %fault,
                "failed to refresh latest page"
            );
        }
    }
}

fn page_value<T: Serialize>(page: &[T]) -> Value {
    serde_json::to_value(page).unwrap_or_else(|error| {
        warn!(target: HISTORY_TARGET, %error, "history item failed to serialize");
        Value::Array(Vec::new())
    })
}
