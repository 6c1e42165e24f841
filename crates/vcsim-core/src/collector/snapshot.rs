//! Captured property values and the diff between two captures.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::collector::spec::{PropertyFilterSpec, PropertySpec};
use crate::collector::traverse::{Roots, resolve_object_set};
use crate::collector::update::{
    DynamicProperty, ObjectContent, ObjectUpdate, ObjectUpdateKind, PropertyChange, PropertyValue,
};
use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::{Catalog, FieldType};

/// Requested values of one object at one version.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjectSnapshot {
    version: u64,
    values: Vec<(String, PropertyValue)>,
}

impl ObjectSnapshot {
    fn capture(object: &ManagedObject, paths: &[String]) -> Self {
        Self {
            version: object.version(),
            values: paths
                .iter()
                .map(|path| (path.clone(), PropertyValue::from_option(object.get(path))))
                .collect(),
        }
    }

    fn value(&self, path: &str) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, value)| value)
    }
}

/// Requested values of every object in a filter's view.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Snapshot {
    order: Vec<ObjectReference>,
    objects: HashMap<ObjectReference, ObjectSnapshot>,
}

impl Snapshot {
    /// Captures the current values for `spec`.
    ///
    /// Objects whose version matches `previous` reuse the earlier values
    /// instead of being read again.
    pub(crate) fn capture(
        registry: &Registry,
        catalog: &Catalog,
        spec: &PropertyFilterSpec,
        roots: Roots,
        previous: Option<&Self>,
    ) -> Result<Self, Fault> {
        let mut snapshot = Self::default();
        for obj in resolve_object_set(registry, catalog, spec, roots)? {
            let Some(paths) = requested_paths(catalog, obj.kind(), &spec.prop_set)? else {
                continue;
            };
            let earlier = previous.and_then(|prior| prior.objects.get(&obj));
            let Ok(captured) = registry.inspect(&obj, |object| match earlier {
                Some(cached) if cached.version == object.version() => cached.clone(),
                _ => ObjectSnapshot::capture(object, &paths),
            }) else {
                continue;
            };
            snapshot.order.push(obj.clone());
            snapshot.objects.insert(obj, captured);
        }
        Ok(snapshot)
    }

    /// Converts the snapshot into retrieval results.
    pub(crate) fn into_contents(mut self) -> Vec<ObjectContent> {
        self.order
            .into_iter()
            .filter_map(|obj| {
                let captured = self.objects.remove(&obj)?;
                Some(ObjectContent {
                    obj,
                    prop_set: captured
                        .values
                        .into_iter()
                        .map(|(name, val)| DynamicProperty { name, val })
                        .collect(),
                })
            })
            .collect()
    }

    /// Object updates that turn `self` into `current`.
    pub(crate) fn diff(&self, catalog: &Catalog, current: &Self) -> Vec<ObjectUpdate> {
        let mut updates = Vec::new();
        for obj in &current.order {
            let Some(now) = current.objects.get(obj) else {
                continue;
            };
            match self.objects.get(obj) {
                None => updates.push(ObjectUpdate {
                    kind: ObjectUpdateKind::Enter,
                    obj: obj.clone(),
                    change_set: now
                        .values
                        .iter()
                        .filter_map(|(name, value)| {
                            value
                                .as_value()
                                .map(|present| PropertyChange::assign(name.clone(), present.clone()))
                        })
                        .collect(),
                }),
                Some(before) if before.version == now.version => {}
                Some(before) => {
                    let change_set = diff_object(catalog, obj.kind(), before, now);
                    if !change_set.is_empty() {
                        updates.push(ObjectUpdate {
                            kind: ObjectUpdateKind::Modify,
                            obj: obj.clone(),
                            change_set,
                        });
                    }
                }
            }
        }
        for obj in &self.order {
            if !current.objects.contains_key(obj) {
                updates.push(ObjectUpdate {
                    kind: ObjectUpdateKind::Leave,
                    obj: obj.clone(),
                    change_set: Vec::new(),
                });
            }
        }
        updates
    }
}

/// Validates every path of every property spec against the catalog.
pub(crate) fn validate(catalog: &Catalog, spec: &PropertyFilterSpec) -> Result<(), Fault> {
    for properties in &spec.prop_set {
        if properties.all && catalog.schema(&properties.kind).is_none() {
            return Err(Fault::invalid_property(&properties.kind, "*"));
        }
        for path in &properties.path_set {
            catalog.resolve(&properties.kind, path)?;
        }
    }
    Ok(())
}

/// Paths requested for objects of `kind`, or `None` when no spec names it.
fn requested_paths(
    catalog: &Catalog,
    kind: &str,
    prop_set: &[PropertySpec],
) -> Result<Option<Vec<String>>, Fault> {
    let mut matched = false;
    let mut paths: Vec<String> = Vec::new();
    for properties in prop_set.iter().filter(|properties| properties.kind == kind) {
        matched = true;
        if properties.all {
            let schema = catalog
                .schema(kind)
                .ok_or_else(|| Fault::invalid_property(kind, "*"))?;
            for name in schema.names() {
                if !paths.iter().any(|existing| existing == name) {
                    paths.push(name.to_owned());
                }
            }
        }
        for path in &properties.path_set {
            catalog.resolve(kind, path)?;
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
    }
    Ok(matched.then_some(paths))
}

fn diff_object(
    catalog: &Catalog,
    kind: &str,
    before: &ObjectSnapshot,
    now: &ObjectSnapshot,
) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    for (path, value) in &now.values {
        let previous = before.value(path).unwrap_or(&PropertyValue::Unset);
        let field = catalog.resolve(kind, path).ok();
        diff_property(field, path, previous, value, &mut changes);
    }
    let mut unique: Vec<PropertyChange> = Vec::with_capacity(changes.len());
    for change in changes {
        if !unique.contains(&change) {
            unique.push(change);
        }
    }
    unique
}

fn diff_property(
    field: Option<&FieldType>,
    path: &str,
    before: &PropertyValue,
    now: &PropertyValue,
    changes: &mut Vec<PropertyChange>,
) {
    match (before, now) {
        (PropertyValue::Unset, PropertyValue::Unset) => {}
        (PropertyValue::Set(_), PropertyValue::Unset) => changes.push(PropertyChange::remove(path)),
        (PropertyValue::Unset, PropertyValue::Set(value)) => {
            changes.push(PropertyChange::assign(path, value.clone()));
        }
        (PropertyValue::Set(old), PropertyValue::Set(new)) if old == new => {}
        (PropertyValue::Set(old), PropertyValue::Set(new)) => {
            diff_values(field, path, old, new, changes);
        }
    }
}

fn diff_values(
    field: Option<&FieldType>,
    path: &str,
    old: &Value,
    new: &Value,
    changes: &mut Vec<PropertyChange>,
) {
    match (field, old, new) {
        (Some(FieldType::Struct(schema)), Value::Object(before), Value::Object(now)) => {
            let keys: BTreeSet<&String> = before.keys().chain(now.keys()).collect();
            for key in keys {
                let nested = format!("{path}.{key}");
                diff_property(
                    schema.get(key),
                    &nested,
                    &PropertyValue::from_option(before.get(key).filter(|value| !value.is_null())),
                    &PropertyValue::from_option(now.get(key).filter(|value| !value.is_null())),
                    changes,
                );
            }
        }
        (Some(field_type), Value::Array(before), Value::Array(now)) if field_type.is_set() => {
            for item in before.iter().filter(|item| !now.contains(item)) {
                changes.push(PropertyChange::remove_from_set(path, item.clone()));
            }
            for item in now.iter().filter(|item| !before.contains(item)) {
                changes.push(PropertyChange::add_to_set(path, item.clone()));
            }
        }
        _ => changes.push(PropertyChange::assign(path, new.clone())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collector::update::ChangeOp;
    use crate::schema::Schema;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register(
            "Widget",
            Schema::new()
                .field("name", FieldType::Value)
                .field("tags", FieldType::ValueSet)
                .field("sizes", FieldType::Value)
                .nested(
                    "config",
                    Schema::new()
                        .field("version", FieldType::Value)
                        .nested("hardware", Schema::new().field("numCpu", FieldType::Value)),
                ),
        );
        catalog
    }

    fn diff(path: &str, old: Value, new: Value) -> Vec<PropertyChange> {
        let catalog = catalog();
        let field = catalog.resolve("Widget", path).ok();
        let mut changes = Vec::new();
        diff_property(
            field,
            path,
            &PropertyValue::Set(old),
            &PropertyValue::Set(new),
            &mut changes,
        );
        changes
    }

    #[test]
    fn nested_struct_reports_deepest_path() {
        let changes = diff(
            "config",
            json!({"version": "vmx-19", "hardware": {"numCpu": 2}}),
            json!({"version": "vmx-19", "hardware": {"numCpu": 4}}),
        );
        assert_eq!(
            changes,
            vec![PropertyChange::assign("config.hardware.numCpu", json!(4))]
        );
    }

    #[test]
    fn set_fields_report_element_changes() {
        let changes = diff("tags", json!(["a", "b"]), json!(["b", "c"]));
        assert_eq!(
            changes,
            vec![
                PropertyChange::remove_from_set("tags", json!("a")),
                PropertyChange::add_to_set("tags", json!("c")),
            ]
        );
    }

    #[test]
    fn plain_arrays_are_replaced_wholesale() {
        let changes = diff("sizes", json!([1, 2]), json!([2, 1]));
        assert_eq!(changes, vec![PropertyChange::assign("sizes", json!([2, 1]))]);
    }

    #[test]
    fn reordered_set_reports_nothing() {
        assert!(diff("tags", json!(["a", "b"]), json!(["b", "a"])).is_empty());
    }

    #[test]
    fn cleared_nested_field_is_removed() {
        let changes = diff(
            "config",
            json!({"version": "vmx-19"}),
            json!({"version": null}),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.first().map(|change| change.op), Some(ChangeOp::Remove));
    }
}
