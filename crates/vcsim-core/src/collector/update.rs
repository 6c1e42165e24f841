//! Retrieval results and incremental update sets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::ObjectReference;

/// Value of a requested property: present, or declared but absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "camelCase")]
pub enum PropertyValue {
    /// The property holds a value.
    Set(Value),
    /// The property is declared but has no value.
    Unset,
}

impl PropertyValue {
    /// Wraps an optional value.
    #[must_use]
    pub fn from_option(value: Option<&Value>) -> Self {
        value.map_or(Self::Unset, |present| Self::Set(present.clone()))
    }

    /// Borrows the value when set.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset => None,
        }
    }

    /// Returns true when the property holds a value.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

/// One requested property of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicProperty {
    /// Requested path.
    pub name: String,
    /// Current value.
    pub val: PropertyValue,
}

/// Requested properties of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContent {
    /// The object.
    pub obj: ObjectReference,
    /// Requested properties in request order.
    pub prop_set: Vec<DynamicProperty>,
}

impl ObjectContent {
    /// Looks up a property by path.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.prop_set
            .iter()
            .find(|property| property.name == name)
            .map(|property| &property.val)
    }
}

/// How a property changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOp {
    /// The property took a new value.
    Assign,
    /// The property lost its value.
    Remove,
    /// An element joined a set-valued property.
    AddToSet,
    /// An element left a set-valued property.
    RemoveFromSet,
}

/// A single property change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Dotted path of the changed property, as deep as the change goes.
    pub name: String,
    /// Kind of change.
    pub op: ChangeOp,
    /// New value, or the set element added or removed. Absent for `Remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<Value>,
}

impl PropertyChange {
    /// Assignment of `val` to `name`.
    #[must_use]
    pub fn assign(name: impl Into<String>, val: Value) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::Assign,
            val: Some(val),
        }
    }

    /// Removal of `name`.
    #[must_use]
    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::Remove,
            val: None,
        }
    }

    /// Element `val` added to the set at `name`.
    #[must_use]
    pub fn add_to_set(name: impl Into<String>, val: Value) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::AddToSet,
            val: Some(val),
        }
    }

    /// Element `val` removed from the set at `name`.
    #[must_use]
    pub fn remove_from_set(name: impl Into<String>, val: Value) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::RemoveFromSet,
            val: Some(val),
        }
    }
}

/// Whether an object joined, changed within, or left the filter's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectUpdateKind {
    /// The object entered the view; changes carry its current values.
    Enter,
    /// Requested properties of a viewed object changed.
    Modify,
    /// The object left the view or was removed.
    Leave,
}

/// Changes to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpdate {
    /// Kind of update.
    pub kind: ObjectUpdateKind,
    /// The object.
    pub obj: ObjectReference,
    /// Property changes; empty for `Leave`.
    pub change_set: Vec<PropertyChange>,
}

/// Result of one wait on a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSet {
    /// Token to pass to the next wait.
    pub version: u64,
    /// Per-object updates; empty when the wait timed out.
    pub object_set: Vec<ObjectUpdate>,
}

impl UpdateSet {
    /// Returns true when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_set.is_empty()
    }

    /// Update for `obj`, when present.
    #[must_use]
    pub fn update_for(&self, obj: &ObjectReference) -> Option<&ObjectUpdate> {
        self.object_set.iter().find(|update| &update.obj == obj)
    }
}
