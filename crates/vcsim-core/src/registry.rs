//! Authoritative store of managed objects.
//!
//! Each object lives in its own slot guarded by a mutex, so mutations of
//! different objects proceed in parallel while mutations of one object are
//! serialised. [`Registry::try_mutate`] applies a closure to a copy of the
//! object and commits only when the closure succeeds, so a failed or
//! panicking handler leaves no partial state behind. Observers are told
//! about every committed change after the object lock has been released.
//!
//! Versions come from one registry-wide counter, so an object removed and
//! stored again under the same reference never reuses an earlier version.
//! Closures passed to the registry run under the object's lock and must not
//! call back into the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, trace};

use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Change notification delivered after a mutation commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    /// A new object was stored.
    Created(ObjectReference),
    /// An existing object committed a new version.
    Modified {
        /// The changed object.
        reference: ObjectReference,
        /// Version after the change.
        version: u64,
    },
    /// The object was removed.
    Removed(ObjectReference),
}

impl RegistryChange {
    /// Reference of the object the change concerns.
    #[must_use]
    pub fn reference(&self) -> &ObjectReference {
        match self {
            Self::Created(reference) | Self::Removed(reference) => reference,
            Self::Modified { reference, .. } => reference,
        }
    }
}

/// Receives committed registry changes.
///
/// Implementations must not call back into the mutating methods of the
/// registry from `object_changed`; they typically record the change and wake
/// their own waiters.
pub trait MutationObserver: Send + Sync {
    /// Called once per committed change, outside every object lock.
    fn object_changed(&self, change: &RegistryChange);
}

struct ObjectSlot {
    object: Mutex<Option<ManagedObject>>,
}

impl ObjectSlot {
    fn lock(&self) -> MutexGuard<'_, Option<ManagedObject>> {
        self.object.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Concurrent map from reference to managed object.
#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<ObjectReference, Arc<ObjectSlot>>>,
    observers: RwLock<Vec<Weak<dyn MutationObserver>>>,
    next_id: AtomicU64,
    last_version: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh identifier such as `task-17`.
    pub fn allocate_id(&self, prefix: &str) -> String {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{sequence}")
    }

    fn next_version(&self) -> u64 {
        self.last_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers an observer for committed changes.
    ///
    /// The registry holds a weak reference; dropping the observer
    /// unsubscribes it.
    pub fn subscribe(&self, observer: Weak<dyn MutationObserver>) {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|existing| existing.strong_count() > 0);
        observers.push(observer);
    }

    /// Stores an object, replacing any existing object with the same reference.
    ///
    /// Returns the committed version, which is greater than any version the
    /// registry handed out before.
    pub fn put(&self, mut object: ManagedObject) -> u64 {
        let reference = object.reference().clone();
        let (version, change) = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&reference).cloned() {
                Some(slot) => {
                    let mut guard = slot.lock();
                    let version = self.next_version();
                    object.set_version(version);
                    *guard = Some(object);
                    (
                        version,
                        RegistryChange::Modified {
                            reference: reference.clone(),
                            version,
                        },
                    )
                }
                None => {
                    let version = self.next_version();
                    object.set_version(version);
                    slots.insert(
                        reference.clone(),
                        Arc::new(ObjectSlot {
                            object: Mutex::new(Some(object)),
                        }),
                    );
                    (version, RegistryChange::Created(reference.clone()))
                }
            }
        };
        debug!(target: REGISTRY_TARGET, object = %reference, version, "object stored");
        self.notify(&change);
        version
    }

    /// Returns true when an object with `reference` exists.
    #[must_use]
    pub fn contains(&self, reference: &ObjectReference) -> bool {
        self.slot(reference).is_some()
    }

    /// Returns a snapshot copy of the object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no object has this reference.
    pub fn get(&self, reference: &ObjectReference) -> Result<ManagedObject, Fault> {
        self.inspect(reference, Clone::clone)
    }

    /// Runs `reader` against the object while holding its lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no object has this reference.
    pub fn inspect<R>(
        &self,
        reference: &ObjectReference,
        reader: impl FnOnce(&ManagedObject) -> R,
    ) -> Result<R, Fault> {
        let slot = self
            .slot(reference)
            .ok_or_else(|| Fault::not_found(reference))?;
        let guard = slot.lock();
        guard
            .as_ref()
            .map(reader)
            .ok_or_else(|| Fault::not_found(reference))
    }

    /// Applies a fallible change to the object and commits it atomically.
    ///
    /// The closure receives a copy; nothing is committed when it returns an
    /// error. On success the version is bumped and observers are notified.
    /// Returns the new version together with the closure's value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown references, or the closure's fault.
    pub fn try_mutate<R>(
        &self,
        reference: &ObjectReference,
        change: impl FnOnce(&mut ManagedObject) -> Result<R, Fault>,
    ) -> Result<(u64, R), Fault> {
        let slot = self
            .slot(reference)
            .ok_or_else(|| Fault::not_found(reference))?;
        let (version, value) = {
            let mut guard = slot.lock();
            let current = guard.as_ref().ok_or_else(|| Fault::not_found(reference))?;
            let mut draft = current.clone();
            let value = change(&mut draft)?;
            let version = self.next_version();
            draft.set_version(version);
            *guard = Some(draft);
            (version, value)
        };
        trace!(target: REGISTRY_TARGET, object = %reference, version, "object mutated");
        self.notify(&RegistryChange::Modified {
            reference: reference.clone(),
            version,
        });
        Ok((version, value))
    }

    /// Applies an infallible change, returning the new version.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown references.
    pub fn mutate(
        &self,
        reference: &ObjectReference,
        change: impl FnOnce(&mut ManagedObject),
    ) -> Result<u64, Fault> {
        self.try_mutate(reference, |object| {
            change(object);
            Ok(())
        })
        .map(|(version, ())| version)
    }

    /// Removes an object, returning its final state.
    ///
    /// Waits for any in-flight mutation of the object to finish first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no object has this reference.
    pub fn remove(&self, reference: &ObjectReference) -> Result<ManagedObject, Fault> {
        let slot = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reference)
            .ok_or_else(|| Fault::not_found(reference))?;
        let removed = slot
            .lock()
            .take()
            .ok_or_else(|| Fault::not_found(reference))?;
        debug!(target: REGISTRY_TARGET, object = %reference, "object removed");
        self.notify(&RegistryChange::Removed(reference.clone()));
        Ok(removed)
    }

    /// Removes an object only if `condition` holds for its current state.
    ///
    /// The check and the removal happen under the object's lock, so no
    /// mutation can commit in between.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown references, or the fault produced by
    /// `condition`, in which case the object stays in place.
    pub fn remove_if(
        &self,
        reference: &ObjectReference,
        condition: impl FnOnce(&ManagedObject) -> Result<(), Fault>,
    ) -> Result<ManagedObject, Fault> {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let slot = slots
                .get(reference)
                .cloned()
                .ok_or_else(|| Fault::not_found(reference))?;
            let mut guard = slot.lock();
            condition(guard.as_ref().ok_or_else(|| Fault::not_found(reference))?)?;
            slots.remove(reference);
            guard.take().ok_or_else(|| Fault::not_found(reference))?
        };
        debug!(target: REGISTRY_TARGET, object = %reference, "object removed");
        self.notify(&RegistryChange::Removed(reference.clone()));
        Ok(removed)
    }

    /// References of every object of `kind`, sorted.
    #[must_use]
    pub fn list(&self, kind: &str) -> Vec<ObjectReference> {
        let mut references: Vec<ObjectReference> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|reference| reference.is_kind(kind))
            .cloned()
            .collect();
        references.sort();
        references
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when the registry holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every object, notifying observers of each removal.
    pub fn clear(&self) {
        let drained: Vec<(ObjectReference, Arc<ObjectSlot>)> = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (reference, slot) in drained {
            slot.lock().take();
            self.notify(&RegistryChange::Removed(reference));
        }
    }

    fn slot(&self, reference: &ObjectReference) -> Option<Arc<ObjectSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
    }

    fn notify(&self, change: &RegistryChange) {
        let observers: Vec<Arc<dyn MutationObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for observer in observers {
            observer.object_changed(change);
        }
    }
}
