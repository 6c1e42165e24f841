//! Filter specifications: which objects to visit and which paths to report.

use serde::{Deserialize, Serialize};

use crate::reference::ObjectReference;

/// Object set plus property selection, shared by retrieval and filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilterSpec {
    /// Starting objects and the traversals to follow from them.
    pub object_set: Vec<ObjectSpec>,
    /// Paths to report per object kind.
    pub prop_set: Vec<PropertySpec>,
}

impl PropertyFilterSpec {
    /// Spec reporting `paths` of a single object.
    #[must_use]
    pub fn for_object<I, S>(obj: &ObjectReference, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            object_set: vec![ObjectSpec::new(obj.clone())],
            prop_set: vec![PropertySpec::new(obj.kind(), paths)],
        }
    }

    /// Adds an object spec.
    #[must_use]
    pub fn with_object(mut self, object: ObjectSpec) -> Self {
        self.object_set.push(object);
        self
    }

    /// Adds a property spec.
    #[must_use]
    pub fn with_properties(mut self, properties: PropertySpec) -> Self {
        self.prop_set.push(properties);
        self
    }

    /// Returns true when any object spec follows traversals.
    #[must_use]
    pub fn has_traversal(&self) -> bool {
        self.object_set
            .iter()
            .any(|object| !object.select_set.is_empty())
    }
}

/// A starting object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSpec {
    /// The starting object.
    pub obj: ObjectReference,
    /// When true the starting object itself is not reported.
    #[serde(default)]
    pub skip: bool,
    /// Traversals applied from the starting object.
    #[serde(default)]
    pub select_set: Vec<SelectionSpec>,
}

impl ObjectSpec {
    /// Visits only `obj`.
    #[must_use]
    pub fn new(obj: ObjectReference) -> Self {
        Self {
            obj,
            skip: false,
            select_set: Vec::new(),
        }
    }

    /// Marks the starting object as not reported.
    #[must_use]
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Adds a selection to follow from the starting object.
    #[must_use]
    pub fn select(mut self, selection: SelectionSpec) -> Self {
        self.select_set.push(selection);
        self
    }
}

/// Paths to report for objects of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    /// Kind the paths apply to.
    #[serde(rename = "type")]
    pub kind: String,
    /// When true every top-level declared field is reported.
    #[serde(default)]
    pub all: bool,
    /// Dotted property paths.
    #[serde(default)]
    pub path_set: Vec<String>,
}

impl PropertySpec {
    /// Reports `paths` for objects of `kind`.
    #[must_use]
    pub fn new<I, S>(kind: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.to_owned(),
            all: false,
            path_set: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Reports every top-level field of `kind`.
    #[must_use]
    pub fn all(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            all: true,
            path_set: Vec::new(),
        }
    }
}

/// A traversal step, either inline or a reference to a named traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectionSpec {
    /// Inline traversal.
    Traversal(TraversalSpec),
    /// Reference to a traversal declared by name elsewhere in the spec.
    Named {
        /// Name of the referenced traversal.
        name: String,
    },
}

impl SelectionSpec {
    /// Reference to a named traversal.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }
}

impl From<TraversalSpec> for SelectionSpec {
    fn from(spec: TraversalSpec) -> Self {
        Self::Traversal(spec)
    }
}

/// Follows a reference-valued field of objects of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalSpec {
    /// Optional name, used by `SelectionSpec::Named` references.
    #[serde(default)]
    pub name: String,
    /// Kind of object the traversal applies to.
    #[serde(rename = "type")]
    pub kind: String,
    /// Reference or reference-set field to follow.
    pub path: String,
    /// When true the reached objects are not reported, only traversed.
    #[serde(default)]
    pub skip: bool,
    /// Further traversals applied to reached objects.
    #[serde(default)]
    pub select_set: Vec<SelectionSpec>,
}

impl TraversalSpec {
    /// Creates a named traversal along `path` of `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: &str, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.to_owned(),
            path: path.into(),
            skip: false,
            select_set: Vec::new(),
        }
    }

    /// Marks reached objects as traversed but not reported.
    #[must_use]
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Adds a nested selection.
    #[must_use]
    pub fn select(mut self, selection: SelectionSpec) -> Self {
        self.select_set.push(selection);
        self
    }

    /// Identity used for cycle detection: the name, or `kind.path` when anonymous.
    #[must_use]
    pub fn identity(&self) -> String {
        if self.name.is_empty() {
            format!("{}.{}", self.kind, self.path)
        } else {
            self.name.clone()
        }
    }
}
