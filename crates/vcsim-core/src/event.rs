//! Event log: immutable records of notable inventory changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::history::HistoryStream;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::kinds;

const EVENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// A posted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Monotonic event key.
    pub key: u64,
    /// Event type, for example `VmPoweredOnEvent`.
    pub event_type: String,
    /// When the event was posted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
    /// Object the event concerns.
    #[serde(default)]
    pub object: Option<ObjectReference>,
    /// Human-readable description.
    pub message: String,
    /// User on whose behalf the event was posted.
    pub user_name: String,
}

/// Selects events for a collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterSpec {
    /// Only events concerning this object.
    #[serde(default)]
    pub entity: Option<ObjectReference>,
    /// Only events of these types; empty accepts every type.
    #[serde(default)]
    pub event_types: Vec<String>,
}

impl EventFilterSpec {
    /// Returns true when `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let entity_matches = self
            .entity
            .as_ref()
            .is_none_or(|entity| event.object.as_ref() == Some(entity));
        let type_matches = self.event_types.is_empty()
            || self
                .event_types
                .iter()
                .any(|event_type| event_type == &event.event_type);
        entity_matches && type_matches
    }
}

/// Owns the event stream and the `EventManager` registry object.
pub struct EventManager {
    reference: ObjectReference,
    registry: Arc<Registry>,
    stream: HistoryStream<Event>,
    next_key: AtomicU64,
}

impl EventManager {
    /// Creates the manager and registers its singleton object.
    #[must_use]
    pub fn new(registry: Arc<Registry>, capacity: usize, page_size: usize) -> Self {
        let reference = ObjectReference::new(kinds::EVENT_MANAGER, "EventManager");
        registry.put(ManagedObject::new(reference.clone()));
        Self {
            reference,
            stream: HistoryStream::new(
                Arc::clone(&registry),
                kinds::EVENT_HISTORY_COLLECTOR,
                capacity,
                page_size,
            ),
            registry,
            next_key: AtomicU64::new(1),
        }
    }

    /// Reference of the `EventManager` singleton.
    #[must_use]
    pub const fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    /// Event stream and its collectors.
    #[must_use]
    pub const fn stream(&self) -> &HistoryStream<Event> {
        &self.stream
    }

    /// Records an event and publishes it as the manager's `latestEvent`.
    pub fn post(
        &self,
        event_type: &str,
        object: Option<&ObjectReference>,
        message: impl Into<String>,
        user_name: &str,
    ) -> Event {
        let event = Event {
            key: self.next_key.fetch_add(1, Ordering::Relaxed),
            event_type: event_type.to_owned(),
            created_time: OffsetDateTime::now_utc(),
            object: object.cloned(),
            message: message.into(),
            user_name: user_name.to_owned(),
        };
        debug!(
            target: EVENT_TARGET,
            key = event.key,
            event_type = %event.event_type,
            "event posted"
        );
        self.stream.append(event.clone());
        let published = self.registry.try_mutate(&self.reference, |manager| {
            manager.encode("latestEvent", &event)
        });
        if let Err(fault) = published {
            warn!(target: EVENT_TARGET, %fault, "failed to publish latest event");
        }
        event
    }

    /// Creates a collector over events accepted by `filter`.
    pub fn create_collector(&self, filter: EventFilterSpec) -> ObjectReference {
        self.stream.create_collector(move |event| filter.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posted_event_becomes_latest_event() {
        let registry = Arc::new(Registry::new());
        let manager = EventManager::new(Arc::clone(&registry), 10, 5);
        let vm = ObjectReference::new(kinds::VIRTUAL_MACHINE, "vm-1");
        let event = manager.post("VmPoweredOnEvent", Some(&vm), "vm-1 powered on", "vcsim");
        let object = registry.get(manager.reference()).expect("manager object");
        assert_eq!(object.get_str("latestEvent.eventType"), Some("VmPoweredOnEvent"));
        assert_eq!(object.references("latestEvent.object"), vec![vm]);
        assert_eq!(event.key, 1);
    }

    #[test]
    fn filter_selects_entity_and_type() {
        let vm = ObjectReference::new(kinds::VIRTUAL_MACHINE, "vm-1");
        let registry = Arc::new(Registry::new());
        let manager = EventManager::new(Arc::clone(&registry), 10, 5);
        let collector = manager.create_collector(EventFilterSpec {
            entity: Some(vm.clone()),
            event_types: vec!["VmPoweredOnEvent".to_owned()],
        });
        manager.post("VmPoweredOnEvent", Some(&vm), "on", "vcsim");
        manager.post("VmPoweredOffEvent", Some(&vm), "off", "vcsim");
        manager.post("VmPoweredOnEvent", None, "elsewhere", "vcsim");
        let page = manager
            .stream()
            .collector(&collector)
            .expect("collector")
            .read_next(10)
            .expect("read");
        assert_eq!(page.len(), 1);
        assert_eq!(page.first().map(|event| event.message.as_str()), Some("on"));
    }
}
