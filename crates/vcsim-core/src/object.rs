//! Managed objects and dotted-path property access.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::fault::Fault;
use crate::reference::ObjectReference;

/// A simulated entity: identity, version counter and a property tree.
///
/// Properties are stored as a JSON object. Nested structures are nested
/// objects; a missing key and an explicit `null` both read as absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedObject {
    reference: ObjectReference,
    version: u64,
    properties: Map<String, Value>,
}

impl ManagedObject {
    /// Creates an object with no properties.
    #[must_use]
    pub fn new(reference: ObjectReference) -> Self {
        Self {
            reference,
            version: 0,
            properties: Map::new(),
        }
    }

    /// Sets a property at `path`, returning the updated object.
    #[must_use]
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Sets a reference-valued property at `path`.
    #[must_use]
    pub fn with_reference(self, path: &str, reference: &ObjectReference) -> Self {
        self.with(path, reference.to_value())
    }

    /// Sets a reference-set property at `path`.
    #[must_use]
    pub fn with_references<'a>(
        self,
        path: &str,
        references: impl IntoIterator<Item = &'a ObjectReference>,
    ) -> Self {
        let values: Vec<Value> = references.into_iter().map(ObjectReference::to_value).collect();
        self.with(path, Value::Array(values))
    }

    /// Identity of the object.
    #[must_use]
    pub fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    /// Kind of the object.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.reference.kind()
    }

    /// Version counter, bumped by the registry on every committed change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Full property tree.
    #[must_use]
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Reads the value at a dotted path. Absent and `null` values read as `None`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.properties.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    /// Reads a string property.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Reads a boolean property, treating absence as `false`.
    #[must_use]
    pub fn flag(&self, path: &str) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Reads every object reference stored at `path`, whether a single
    /// reference or a set.
    #[must_use]
    pub fn references(&self, path: &str) -> Vec<ObjectReference> {
        match self.get(path) {
            Some(Value::Array(items)) => items.iter().filter_map(ObjectReference::from_value).collect(),
            Some(value) => ObjectReference::from_value(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Decodes a typed value stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the value is absent or has the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<T, Fault> {
        let value = self.get(path).ok_or_else(|| {
            Fault::invalid_state(format!("{} has no value at '{path}'", self.reference))
        })?;
        T::deserialize(value).map_err(|error| {
            Fault::invalid_state(format!("{} has malformed '{path}': {error}", self.reference))
        })
    }

    /// Encodes a typed value and stores it at `path`.
    ///
    /// # Errors
    ///
    /// Returns `OperationFault` when the value cannot be encoded.
    pub fn encode<T: Serialize>(&mut self, path: &str, value: &T) -> Result<(), Fault> {
        let encoded = serde_json::to_value(value)
            .map_err(|error| Fault::operation("EncodingFailed", error.to_string()))?;
        self.set(path, encoded);
        Ok(())
    }

    /// Writes `value` at a dotted path, creating intermediate structures.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };
        let mut current = &mut self.properties;
        for segment in segments {
            let entry = current
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_owned(), value.into());
    }

    /// Removes the value at a dotted path, returning it.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut current = &mut self.properties;
        for segment in segments {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// Adds `value` to the set stored at `path` unless already present.
    ///
    /// Returns true when the set changed.
    pub fn add_to_set(&mut self, path: &str, value: Value) -> bool {
        let mut items = self.set_items(path);
        if items.contains(&value) {
            return false;
        }
        items.push(value);
        self.set(path, Value::Array(items));
        true
    }

    /// Removes `value` from the set stored at `path`.
    ///
    /// Returns true when the set changed.
    pub fn remove_from_set(&mut self, path: &str, value: &Value) -> bool {
        let mut items = self.set_items(path);
        let before = items.len();
        items.retain(|item| item != value);
        if items.len() == before {
            return false;
        }
        self.set(path, Value::Array(items));
        true
    }

    fn set_items(&self, path: &str) -> Vec<Value> {
        self.get(path)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}
