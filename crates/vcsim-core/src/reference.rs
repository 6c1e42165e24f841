//! Opaque identities for managed objects.
//!
//! An [`ObjectReference`] pairs a managed-object kind with an identifier that
//! is unique within the simulator. References are the only handle that crosses
//! component boundaries: the property collector, task manager and dispatcher
//! all name objects this way and never share the objects themselves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identity of a managed object: its kind plus a simulator-unique identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    kind: String,
    id: String,
}

impl ObjectReference {
    /// Builds a reference from a kind and identifier.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Managed-object kind, for example `VirtualMachine`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Identifier, for example `vm-42`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true when the reference names an object of `kind`.
    #[must_use]
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Encodes the reference as a property value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "kind": self.kind, "id": self.id })
    }

    /// Decodes a reference previously stored with [`Self::to_value`].
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("kind")?.as_str()?;
        let id = value.get("id")?.as_str()?;
        Some(Self::new(kind, id))
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for ObjectReference {
    type Err = ReferenceParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (kind, id) = input
            .split_once(':')
            .ok_or_else(|| ReferenceParseError::MissingSeparator(input.to_owned()))?;
        if kind.is_empty() || id.is_empty() {
            return Err(ReferenceParseError::EmptyComponent(input.to_owned()));
        }
        Ok(Self::new(kind, id))
    }
}

/// Errors raised when parsing the `Kind:id` text form of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceParseError {
    /// The text had no `:` between kind and identifier.
    #[error("object reference '{0}' is missing the ':' separator")]
    MissingSeparator(String),
    /// Either side of the separator was empty.
    #[error("object reference '{0}' has an empty kind or identifier")]
    EmptyComponent(String),
}
