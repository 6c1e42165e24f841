//! Property schemas for every managed-object kind.
//!
//! A [`Catalog`] maps a kind name to its [`Schema`], the tree of declared
//! fields. Property paths are validated against the catalog before any value
//! is read, which is what distinguishes an unknown path (`InvalidProperty`)
//! from a declared-but-absent one (unset).

use std::collections::{BTreeMap, HashMap};

use crate::fault::Fault;

/// Kind names of the built-in managed objects.
pub mod kinds {
    /// Inventory container.
    pub const FOLDER: &str = "Folder";
    /// Datacenter grouping hosts and virtual machines.
    pub const DATACENTER: &str = "Datacenter";
    /// Hypervisor host.
    pub const HOST_SYSTEM: &str = "HostSystem";
    /// Virtual machine or template.
    pub const VIRTUAL_MACHINE: &str = "VirtualMachine";
    /// Asynchronous operation handle.
    pub const TASK: &str = "Task";
    /// Singleton owning the task set.
    pub const TASK_MANAGER: &str = "TaskManager";
    /// Singleton owning the event stream.
    pub const EVENT_MANAGER: &str = "EventManager";
    /// Root singleton describing the service.
    pub const SERVICE_INSTANCE: &str = "ServiceInstance";
    /// Paginated view over the task stream.
    pub const TASK_HISTORY_COLLECTOR: &str = "TaskHistoryCollector";
    /// Paginated view over the event stream.
    pub const EVENT_HISTORY_COLLECTOR: &str = "EventHistoryCollector";
    /// Singleton handing out property filters.
    pub const PROPERTY_COLLECTOR: &str = "PropertyCollector";
    /// Property-collector filter handle.
    pub const PROPERTY_FILTER: &str = "PropertyFilter";
}

/// Declared type of a field, which governs how changes to it are reported.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Opaque scalar or list, replaced wholesale on change.
    Value,
    /// Nested structure whose fields are diffed individually.
    Struct(Schema),
    /// Single object reference; traversable.
    Reference,
    /// Unordered set of object references; traversable and diffed per element.
    ReferenceSet,
    /// Unordered set of plain values, diffed per element.
    ValueSet,
}

impl FieldType {
    /// Returns true when traversal specs may follow this field.
    #[must_use]
    pub fn is_traversable(&self) -> bool {
        matches!(self, Self::Reference | Self::ReferenceSet)
    }

    /// Returns true when changes are reported as set additions and removals.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::ReferenceSet | Self::ValueSet)
    }
}

/// Declared fields of a kind or nested structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, returning the extended schema.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Adds a nested structure field.
    #[must_use]
    pub fn nested(self, name: impl Into<String>, schema: Self) -> Self {
        self.field(name, FieldType::Struct(schema))
    }

    /// Looks up a direct child field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    /// Names of the top-level fields in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Walks a dotted path through nested structures.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&FieldType> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|segment| !segment.is_empty())?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            let FieldType::Struct(schema) = current else {
                return None;
            };
            current = schema.fields.get(segment)?;
        }
        Some(current)
    }
}

/// Schemas for every kind the simulator knows.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: HashMap<String, Schema>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the schema for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, schema: Schema) {
        self.kinds.insert(kind.into(), schema);
    }

    /// Returns the schema for `kind`.
    #[must_use]
    pub fn schema(&self, kind: &str) -> Option<&Schema> {
        self.kinds.get(kind)
    }

    /// Resolves `path` against the schema of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperty` naming the path when the kind is unknown or
    /// the path is not declared.
    pub fn resolve(&self, kind: &str, path: &str) -> Result<&FieldType, Fault> {
        self.kinds
            .get(kind)
            .and_then(|schema| schema.resolve(path))
            .ok_or_else(|| Fault::invalid_property(kind, path))
    }

    /// Catalog describing the built-in inventory kinds.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(kinds::FOLDER, folder_schema());
        catalog.register(kinds::DATACENTER, datacenter_schema());
        catalog.register(kinds::HOST_SYSTEM, host_schema());
        catalog.register(kinds::VIRTUAL_MACHINE, virtual_machine_schema());
        catalog.register(kinds::TASK, task_schema());
        catalog.register(
            kinds::TASK_MANAGER,
            Schema::new().field("recentTask", FieldType::ReferenceSet),
        );
        catalog.register(
            kinds::EVENT_MANAGER,
            Schema::new().nested("latestEvent", event_schema()),
        );
        catalog.register(kinds::PROPERTY_COLLECTOR, Schema::new());
        catalog.register(kinds::SERVICE_INSTANCE, service_instance_schema());
        catalog.register(kinds::TASK_HISTORY_COLLECTOR, collector_schema());
        catalog.register(kinds::EVENT_HISTORY_COLLECTOR, collector_schema());
        catalog
    }
}

fn folder_schema() -> Schema {
    Schema::new()
        .field("name", FieldType::Value)
        .field("parent", FieldType::Reference)
        .field("childType", FieldType::ValueSet)
        .field("childEntity", FieldType::ReferenceSet)
}

fn datacenter_schema() -> Schema {
    Schema::new()
        .field("name", FieldType::Value)
        .field("parent", FieldType::Reference)
        .field("vmFolder", FieldType::Reference)
        .field("hostFolder", FieldType::Reference)
}

fn host_schema() -> Schema {
    Schema::new()
        .field("name", FieldType::Value)
        .field("parent", FieldType::Reference)
        .field("vm", FieldType::ReferenceSet)
        .nested(
            "summary",
            Schema::new()
                .field("connectionState", FieldType::Value)
                .field("overallStatus", FieldType::Value),
        )
        .nested(
            "hardware",
            Schema::new()
                .field("numCpu", FieldType::Value)
                .field("memoryMB", FieldType::Value),
        )
}

fn virtual_machine_schema() -> Schema {
    Schema::new()
        .field("name", FieldType::Value)
        .field("parent", FieldType::Reference)
        .nested(
            "power",
            Schema::new()
                .field("state", FieldType::Value)
                .field("bootTime", FieldType::Value),
        )
        .nested(
            "runtime",
            Schema::new().field("host", FieldType::Reference),
        )
        .nested(
            "config",
            Schema::new()
                .field("version", FieldType::Value)
                .field("template", FieldType::Value)
                .field("guestId", FieldType::Value)
                .field("numCpu", FieldType::Value)
                .field("memoryMB", FieldType::Value)
                .field("annotation", FieldType::Value),
        )
        .field("tag", FieldType::ValueSet)
}

fn task_schema() -> Schema {
    Schema::new().nested(
        "info",
        Schema::new()
            .field("key", FieldType::Value)
            .field("task", FieldType::Reference)
            .field("descriptionId", FieldType::Value)
            .field("entity", FieldType::Reference)
            .field("entityName", FieldType::Value)
            .field("initiator", FieldType::Value)
            .field("state", FieldType::Value)
            .field("cancelable", FieldType::Value)
            .field("cancelled", FieldType::Value)
            .field("progress", FieldType::Value)
            .field("queueTime", FieldType::Value)
            .field("startTime", FieldType::Value)
            .field("completeTime", FieldType::Value)
            .field("result", FieldType::Value)
            .field("error", FieldType::Value),
    )
}

fn event_schema() -> Schema {
    Schema::new()
        .field("key", FieldType::Value)
        .field("eventType", FieldType::Value)
        .field("createdTime", FieldType::Value)
        .field("object", FieldType::Reference)
        .field("message", FieldType::Value)
        .field("userName", FieldType::Value)
}

fn service_instance_schema() -> Schema {
    Schema::new()
        .nested(
            "content",
            Schema::new()
                .field("rootFolder", FieldType::Reference)
                .field("propertyCollector", FieldType::Reference)
                .field("taskManager", FieldType::Reference)
                .field("eventManager", FieldType::Reference),
        )
        .nested(
            "about",
            Schema::new()
                .field("name", FieldType::Value)
                .field("apiType", FieldType::Value)
                .field("version", FieldType::Value),
        )
}

fn collector_schema() -> Schema {
    Schema::new()
        .field("latestPage", FieldType::Value)
        .field("pageSize", FieldType::Value)
}
