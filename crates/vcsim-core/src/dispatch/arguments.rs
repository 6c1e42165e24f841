//! Named operation arguments.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::fault::Fault;
use crate::reference::ObjectReference;

/// Arguments of an invocation, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// Empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument, returning the extended list.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_owned(), value.into());
        self
    }

    /// Builds arguments from a JSON object; `null` means no arguments.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the value is neither an object nor `null`.
    pub fn from_value(value: Value) -> Result<Self, Fault> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Fault::invalid_argument("args", "arguments must be a JSON object")),
        }
    }

    /// Raw argument value. `null` reads as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    /// Required string argument.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when missing or not a string.
    pub fn required_str(&self, name: &str) -> Result<&str, Fault> {
        self.optional_str(name)?
            .ok_or_else(|| Fault::invalid_argument(name, "argument is required"))
    }

    /// Optional string argument.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but not a string.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, Fault> {
        self.get(name)
            .map(|value| {
                value
                    .as_str()
                    .ok_or_else(|| Fault::invalid_argument(name, "expected a string"))
            })
            .transpose()
    }

    /// Optional boolean argument.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but not a boolean.
    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, Fault> {
        self.get(name)
            .map(|value| {
                value
                    .as_bool()
                    .ok_or_else(|| Fault::invalid_argument(name, "expected a boolean"))
            })
            .transpose()
    }

    /// Optional unsigned integer argument.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but not a non-negative integer.
    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, Fault> {
        self.get(name)
            .map(|value| {
                value
                    .as_u64()
                    .ok_or_else(|| Fault::invalid_argument(name, "expected a non-negative integer"))
            })
            .transpose()
    }

    /// Optional unsigned integer argument that must fit a `usize`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but not a non-negative integer.
    pub fn optional_usize(&self, name: &str) -> Result<Option<usize>, Fault> {
        self.optional_u64(name)?
            .map(|value| {
                usize::try_from(value).map_err(|_| Fault::invalid_argument(name, "value is too large"))
            })
            .transpose()
    }

    /// Required object reference, given as `{"kind","id"}` or `"Kind:id"`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when missing or malformed.
    pub fn required_reference(&self, name: &str) -> Result<ObjectReference, Fault> {
        self.optional_reference(name)?
            .ok_or_else(|| Fault::invalid_argument(name, "argument is required"))
    }

    /// Optional object reference.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but malformed.
    pub fn optional_reference(&self, name: &str) -> Result<Option<ObjectReference>, Fault> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::String(text) => text.parse().ok(),
            other => ObjectReference::from_value(other),
        };
        parsed
            .map(Some)
            .ok_or_else(|| Fault::invalid_argument(name, "expected an object reference"))
    }

    /// Decodes an optional structured argument.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when present but of the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Fault> {
        self.get(name)
            .map(|value| {
                T::deserialize(value).map_err(|error| Fault::invalid_argument(name, error.to_string()))
            })
            .transpose()
    }
}
