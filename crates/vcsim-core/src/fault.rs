//! Structured faults returned by every engine operation.
//!
//! Faults are values, not panics: they travel back to clients verbatim,
//! are stored in failed task results, and are cloned freely. The serialized
//! form carries a `fault` discriminator so the wire envelope can be decoded
//! without knowing which operation produced it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::ObjectReference;

/// A structured failure surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "camelCase")]
pub enum Fault {
    /// The referenced object does not exist.
    #[error("managed object {obj} was not found")]
    NotFound {
        /// The missing reference.
        obj: ObjectReference,
    },

    /// A property path does not exist in the object's schema.
    #[error("invalid property '{path}' for {kind}")]
    InvalidProperty {
        /// Kind whose schema was consulted.
        kind: String,
        /// The offending dotted path.
        path: String,
    },

    /// The operation is not defined for the object's kind.
    #[error("operation '{operation}' is not supported by {kind}")]
    NotSupported {
        /// Kind of the target object.
        kind: String,
        /// Requested operation name.
        operation: String,
    },

    /// The object is not in a state that permits the request.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable description of the conflict.
        message: String,
    },

    /// The request was cancelled before it completed.
    #[error("request was cancelled")]
    Cancelled,

    /// A handler-specific failure.
    #[error("{name}: {message}")]
    OperationFault {
        /// Short fault name, for example `InvalidPowerState`.
        name: String,
        /// Human-readable detail.
        message: String,
    },

    /// An argument was missing or malformed.
    #[error("invalid argument '{argument}': {message}")]
    InvalidArgument {
        /// Argument name.
        argument: String,
        /// What was wrong with it.
        message: String,
    },

    /// A collector version token is neither the latest nor the acknowledged one.
    #[error("collector version {version} is not known to this filter")]
    InvalidCollectorVersion {
        /// The rejected token.
        version: u64,
    },
}

impl Fault {
    /// Creates a not-found fault.
    #[must_use]
    pub fn not_found(obj: &ObjectReference) -> Self {
        Self::NotFound { obj: obj.clone() }
    }

    /// Creates an invalid-property fault.
    #[must_use]
    pub fn invalid_property(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self::InvalidProperty {
            kind: kind.into(),
            path: path.into(),
        }
    }

    /// Creates a not-supported fault.
    #[must_use]
    pub fn not_supported(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            kind: kind.into(),
            operation: operation.into(),
        }
    }

    /// Creates an invalid-state fault.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a handler-specific operation fault.
    #[must_use]
    pub fn operation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFault {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-argument fault.
    #[must_use]
    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-collector-version fault.
    #[must_use]
    pub fn invalid_collector_version(version: u64) -> Self {
        Self::InvalidCollectorVersion { version }
    }

    /// Short name of the fault kind as it appears on the wire.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "notFound",
            Self::InvalidProperty { .. } => "invalidProperty",
            Self::NotSupported { .. } => "notSupported",
            Self::InvalidState { .. } => "invalidState",
            Self::Cancelled => "cancelled",
            Self::OperationFault { .. } => "operationFault",
            Self::InvalidArgument { .. } => "invalidArgument",
            Self::InvalidCollectorVersion { .. } => "invalidCollectorVersion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_discriminator() {
        let fault = Fault::invalid_property("VirtualMachine", "power.bogus");
        let value = serde_json::to_value(&fault).expect("serialize fault");
        assert_eq!(value["fault"], "invalidProperty");
        assert_eq!(value["path"], "power.bogus");
    }

    #[test]
    fn unit_fault_round_trips() {
        let value = serde_json::to_value(Fault::Cancelled).expect("serialize");
        assert_eq!(value["fault"], Fault::Cancelled.kind_name());
        let decoded: Fault = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, Fault::Cancelled);
    }

    #[test]
    fn not_found_message_names_reference() {
        let fault = Fault::not_found(&ObjectReference::new("VirtualMachine", "vm-9"));
        assert!(fault.to_string().contains("VirtualMachine:vm-9"));
    }
}
