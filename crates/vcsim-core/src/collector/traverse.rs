//! Expansion of an object set through traversal specs.

use std::collections::{HashMap, HashSet};

use crate::collector::spec::{PropertyFilterSpec, SelectionSpec, TraversalSpec};
use crate::fault::Fault;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::Catalog;

/// Whether missing starting objects are an error or silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Roots {
    /// Every starting object must exist.
    Required,
    /// Missing starting objects are skipped; used when re-evaluating filters.
    Optional,
}

/// Resolves the spec's object set into the ordered list of reported objects.
///
/// Objects reachable along several paths are reported once. A traversal
/// that re-enters an object already on the current traversal path is
/// rejected.
pub(crate) fn resolve_object_set(
    registry: &Registry,
    catalog: &Catalog,
    spec: &PropertyFilterSpec,
    roots: Roots,
) -> Result<Vec<ObjectReference>, Fault> {
    let mut walker = Walker::new(registry, catalog, spec);
    for object in &spec.object_set {
        if !registry.contains(&object.obj) {
            match roots {
                Roots::Required => return Err(Fault::not_found(&object.obj)),
                Roots::Optional => continue,
            }
        }
        if !object.skip {
            walker.report(&object.obj);
        }
        walker.visit(&object.obj, &object.select_set)?;
    }
    Ok(walker.reported)
}

struct Walker<'a> {
    registry: &'a Registry,
    catalog: &'a Catalog,
    named: HashMap<&'a str, &'a TraversalSpec>,
    reported: Vec<ObjectReference>,
    seen: HashSet<ObjectReference>,
    expanded: HashSet<(ObjectReference, String)>,
    path: Vec<(ObjectReference, String)>,
}

impl<'a> Walker<'a> {
    fn new(registry: &'a Registry, catalog: &'a Catalog, spec: &'a PropertyFilterSpec) -> Self {
        let mut named = HashMap::new();
        for object in &spec.object_set {
            collect_named(&object.select_set, &mut named);
        }
        Self {
            registry,
            catalog,
            named,
            reported: Vec::new(),
            seen: HashSet::new(),
            expanded: HashSet::new(),
            path: Vec::new(),
        }
    }

    fn report(&mut self, obj: &ObjectReference) {
        if self.seen.insert(obj.clone()) {
            self.reported.push(obj.clone());
        }
    }

    fn visit(&mut self, obj: &ObjectReference, selections: &'a [SelectionSpec]) -> Result<(), Fault> {
        for selection in selections {
            let traversal = self.lookup(selection)?;
            self.follow(obj, traversal)?;
        }
        Ok(())
    }

    fn lookup(&self, selection: &'a SelectionSpec) -> Result<&'a TraversalSpec, Fault> {
        match selection {
            SelectionSpec::Traversal(traversal) => Ok(traversal),
            SelectionSpec::Named { name } => self.named.get(name.as_str()).copied().ok_or_else(|| {
                Fault::invalid_argument("selectSet", format!("selection '{name}' is not defined"))
            }),
        }
    }

    fn follow(&mut self, obj: &ObjectReference, traversal: &'a TraversalSpec) -> Result<(), Fault> {
        if !obj.is_kind(&traversal.kind) {
            return Ok(());
        }
        let field = self.catalog.resolve(&traversal.kind, &traversal.path)?;
        if !field.is_traversable() {
            return Err(Fault::invalid_property(&traversal.kind, &traversal.path));
        }

        let key = (obj.clone(), traversal.identity());
        if self.path.contains(&key) {
            return Err(Fault::invalid_argument(
                "selectSet",
                format!("traversal '{}' re-enters {obj}", key.1),
            ));
        }
        if !self.expanded.insert(key.clone()) {
            return Ok(());
        }

        let Ok(targets) = self
            .registry
            .inspect(obj, |object| object.references(&traversal.path))
        else {
            return Ok(());
        };

        self.path.push(key);
        for target in targets {
            if !self.registry.contains(&target) {
                continue;
            }
            if !traversal.skip {
                self.report(&target);
            }
            self.visit(&target, &traversal.select_set)?;
        }
        self.path.pop();
        Ok(())
    }
}

fn collect_named<'a>(selections: &'a [SelectionSpec], named: &mut HashMap<&'a str, &'a TraversalSpec>) {
    for selection in selections {
        if let SelectionSpec::Traversal(traversal) = selection {
            if !traversal.name.is_empty() {
                named.entry(traversal.name.as_str()).or_insert(traversal);
            }
            collect_named(&traversal.select_set, named);
        }
    }
}
