//! Per-filter baselines and the wake-up signal used by long-polls.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::collector::snapshot::Snapshot;
use crate::collector::spec::PropertyFilterSpec;
use crate::collector::traverse::Roots;
use crate::collector::update::UpdateSet;
use crate::fault::Fault;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::Catalog;

/// Values reported to the client under one version token.
struct Baseline {
    version: u64,
    snapshot: Snapshot,
}

/// The acknowledged baseline plus the latest one handed out.
///
/// The client acknowledges a token by passing it to the next wait. Retrying
/// with the acknowledged token recomputes from the same baseline, so a lost
/// response does not lose changes.
struct FilterState {
    acknowledged: Baseline,
    pending: Option<Baseline>,
}

impl FilterState {
    fn acknowledge(&mut self, token: u64) -> Result<(), Fault> {
        if let Some(pending) = self.pending.take_if(|pending| pending.version == token) {
            self.acknowledged = pending;
            return Ok(());
        }
        if self.acknowledged.version == token {
            self.pending = None;
            return Ok(());
        }
        Err(Fault::invalid_collector_version(token))
    }

    fn next_version(&self) -> u64 {
        let latest = self
            .pending
            .as_ref()
            .map_or(self.acknowledged.version, |pending| pending.version);
        latest.max(self.acknowledged.version) + 1
    }
}

/// Which registry changes can affect the filter.
enum WatchScope {
    /// Traversals may reach any object.
    Everything,
    /// Only the listed starting objects.
    Objects(HashSet<ObjectReference>),
}

/// Outcome of blocking on a filter signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// A watched object changed since the observed generation.
    Changed,
    /// The deadline passed first.
    TimedOut,
    /// The filter was destroyed.
    Cancelled,
}

#[derive(Default)]
struct SignalState {
    generation: u64,
    cancelled: bool,
}

/// Generation counter plus condition variable; no object lock is held while
/// a waiter blocks here.
#[derive(Default)]
pub(crate) struct FilterSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl FilterSignal {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current generation, or `Cancelled` once the filter is destroyed.
    pub(crate) fn observe(&self) -> Result<u64, Fault> {
        let state = self.lock();
        if state.cancelled {
            return Err(Fault::Cancelled);
        }
        Ok(state.generation)
    }

    pub(crate) fn notify(&self) {
        self.lock().generation += 1;
        self.changed.notify_all();
    }

    pub(crate) fn cancel(&self) {
        self.lock().cancelled = true;
        self.changed.notify_all();
    }

    /// Blocks until the generation moves past `observed`, the filter is
    /// cancelled, or `deadline` passes.
    pub(crate) fn wait_past(&self, observed: u64, deadline: Option<Instant>) -> Wake {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return Wake::Cancelled;
            }
            if state.generation != observed {
                return Wake::Changed;
            }
            match deadline {
                None => {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(until) => {
                    let remaining = until.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Wake::TimedOut;
                    }
                    state = self
                        .changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

/// A registered property filter.
pub(crate) struct PropertyFilter {
    reference: ObjectReference,
    spec: PropertyFilterSpec,
    scope: WatchScope,
    state: Mutex<FilterState>,
    pub(crate) signal: FilterSignal,
}

/// Token of the creation baseline.
pub(crate) const INITIAL_VERSION: u64 = 1;

impl PropertyFilter {
    pub(crate) fn new(reference: ObjectReference, spec: PropertyFilterSpec, snapshot: Snapshot) -> Self {
        let scope = if spec.has_traversal() {
            WatchScope::Everything
        } else {
            WatchScope::Objects(spec.object_set.iter().map(|object| object.obj.clone()).collect())
        };
        Self {
            reference,
            spec,
            scope,
            state: Mutex::new(FilterState {
                acknowledged: Baseline {
                    version: INITIAL_VERSION,
                    snapshot,
                },
                pending: None,
            }),
            signal: FilterSignal::default(),
        }
    }

    pub(crate) const fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    pub(crate) fn watches(&self, reference: &ObjectReference) -> bool {
        match &self.scope {
            WatchScope::Everything => true,
            WatchScope::Objects(objects) => objects.contains(reference),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every object in view reported as entering, under a fresh token.
    pub(crate) fn full_update(&self, registry: &Registry, catalog: &Catalog) -> Result<UpdateSet, Fault> {
        let mut state = self.lock_state();
        let current = Snapshot::capture(registry, catalog, &self.spec, Roots::Optional, None)?;
        let object_set = Snapshot::default().diff(catalog, &current);
        let version = state.next_version();
        state.pending = Some(Baseline {
            version,
            snapshot: current,
        });
        Ok(UpdateSet {
            version,
            object_set,
        })
    }

    /// Changes since `token`, or `None` when nothing requested has changed.
    pub(crate) fn poll(
        &self,
        registry: &Registry,
        catalog: &Catalog,
        token: u64,
    ) -> Result<Option<UpdateSet>, Fault> {
        let mut state = self.lock_state();
        state.acknowledge(token)?;
        let base = &state.acknowledged.snapshot;
        let current = Snapshot::capture(registry, catalog, &self.spec, Roots::Optional, Some(base))?;
        let object_set = base.diff(catalog, &current);
        if object_set.is_empty() {
            return Ok(None);
        }
        let version = state.next_version();
        state.pending = Some(Baseline {
            version,
            snapshot: current,
        });
        Ok(Some(UpdateSet {
            version,
            object_set,
        }))
    }
}
