//! Initial inventory: datacenters, hosts and virtual machines.
//!
//! A [`Model`] describes how large an inventory to build and in which
//! flavour. The management-server flavour creates `datacenters` datacenters
//! under the root folder, each with `hosts_per_datacenter` hosts carrying
//! `vms_per_host` virtual machines. The standalone-host flavour always builds
//! a single datacenter with a single host.

use serde_json::Value;
use tracing::info;
use vcsim_config::{Config, ModelKind};

use crate::fault::Fault;
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::kinds;

const MODEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::model");

/// `power.state` of a running virtual machine.
pub const POWERED_ON: &str = "on";
/// `power.state` of a stopped virtual machine.
pub const POWERED_OFF: &str = "off";

const HOST_CPUS: u64 = 4;
const HOST_MEMORY_MB: u64 = 8192;

/// Shape of a virtual machine to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineSpec {
    /// Display name.
    pub name: String,
    /// Virtual CPU count.
    pub num_cpu: u64,
    /// Memory size.
    pub memory_mb: u64,
    /// Guest operating system identifier.
    pub guest_id: String,
}

impl VirtualMachineSpec {
    /// A small powered-off machine named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_cpu: 1,
            memory_mb: 32,
            guest_id: "otherGuest".to_owned(),
        }
    }
}

/// Builds a powered-off virtual machine object.
#[must_use]
pub fn virtual_machine(
    reference: &ObjectReference,
    spec: &VirtualMachineSpec,
    parent: &ObjectReference,
    host: Option<&ObjectReference>,
) -> ManagedObject {
    let object = ManagedObject::new(reference.clone())
        .with("name", spec.name.as_str())
        .with_reference("parent", parent)
        .with("power.state", POWERED_OFF)
        .with("config.version", "vmx-13")
        .with("config.template", false)
        .with("config.guestId", spec.guest_id.as_str())
        .with("config.numCpu", spec.num_cpu)
        .with("config.memoryMB", spec.memory_mb)
        .with("tag", Value::Array(Vec::new()));
    match host {
        Some(owner) => object.with_reference("runtime.host", owner),
        None => object,
    }
}

fn folder(reference: &ObjectReference, name: &str, parent: Option<&ObjectReference>, child_type: &str) -> ManagedObject {
    let object = ManagedObject::new(reference.clone())
        .with("name", name)
        .with("childType", Value::Array(vec![Value::from(child_type)]))
        .with("childEntity", Value::Array(Vec::new()));
    match parent {
        Some(owner) => object.with_reference("parent", owner),
        None => object,
    }
}

/// Creates the root folder every inventory hangs off.
#[must_use]
pub fn root_folder() -> ManagedObject {
    folder(
        &ObjectReference::new(kinds::FOLDER, "group-d1"),
        "Datacenters",
        None,
        kinds::DATACENTER,
    )
}

/// Inventory size and flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    /// Inventory flavour.
    pub kind: ModelKind,
    /// Datacenters under the root folder.
    pub datacenters: u32,
    /// Hosts inside each datacenter.
    pub hosts_per_datacenter: u32,
    /// Virtual machines on each host.
    pub vms_per_host: u32,
}

/// Per-kind object counts of an inventory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelCount {
    /// Folders, including the root folder.
    pub folders: usize,
    /// Datacenters.
    pub datacenters: usize,
    /// Hosts.
    pub hosts: usize,
    /// Virtual machines and templates.
    pub machines: usize,
}

impl Model {
    /// Management-server inventory of the given size.
    #[must_use]
    pub const fn vpx(datacenters: u32, hosts_per_datacenter: u32, vms_per_host: u32) -> Self {
        Self {
            kind: ModelKind::Vpx,
            datacenters,
            hosts_per_datacenter,
            vms_per_host,
        }
    }

    /// Standalone host carrying `vms` virtual machines.
    #[must_use]
    pub const fn esx(vms: u32) -> Self {
        Self {
            kind: ModelKind::Esx,
            datacenters: 1,
            hosts_per_datacenter: 1,
            vms_per_host: vms,
        }
    }

    /// Model described by the daemon configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        match config.model {
            ModelKind::Vpx => Self::vpx(
                config.datacenters,
                config.hosts_per_datacenter,
                config.vms_per_host,
            ),
            ModelKind::Esx => Self::esx(config.vms_per_host),
        }
    }

    /// Builds the inventory under `root`.
    ///
    /// # Errors
    ///
    /// `NotFound` when `root` is not in the registry.
    pub fn create(&self, registry: &Registry, root: &ObjectReference) -> Result<(), Fault> {
        let (datacenters, hosts) = match self.kind {
            ModelKind::Vpx => (self.datacenters, self.hosts_per_datacenter),
            ModelKind::Esx => (1, 1),
        };
        for index in 0..datacenters {
            let name = match self.kind {
                ModelKind::Vpx => format!("DC{index}"),
                ModelKind::Esx => "ha-datacenter".to_owned(),
            };
            let datacenter = self.create_datacenter(registry, root, &name, hosts)?;
            registry.mutate(root, |parent| {
                parent.add_to_set("childEntity", datacenter.to_value());
            })?;
        }
        info!(
            target: MODEL_TARGET,
            flavour = %self.kind,
            datacenters,
            hosts_per_datacenter = hosts,
            vms_per_host = self.vms_per_host,
            "inventory created"
        );
        Ok(())
    }

    fn create_datacenter(
        &self,
        registry: &Registry,
        root: &ObjectReference,
        name: &str,
        hosts: u32,
    ) -> Result<ObjectReference, Fault> {
        let datacenter = ObjectReference::new(kinds::DATACENTER, registry.allocate_id("datacenter"));
        let vm_folder = ObjectReference::new(kinds::FOLDER, registry.allocate_id("group"));
        let host_folder = ObjectReference::new(kinds::FOLDER, registry.allocate_id("group"));
        registry.put(
            ManagedObject::new(datacenter.clone())
                .with("name", name)
                .with_reference("parent", root)
                .with_reference("vmFolder", &vm_folder)
                .with_reference("hostFolder", &host_folder),
        );
        registry.put(folder(&vm_folder, "vm", Some(&datacenter), kinds::VIRTUAL_MACHINE));
        registry.put(folder(&host_folder, "host", Some(&datacenter), kinds::HOST_SYSTEM));

        for host_index in 0..hosts {
            let host_name = match self.kind {
                ModelKind::Vpx => format!("{name}_H{host_index}"),
                ModelKind::Esx => "localhost.localdomain".to_owned(),
            };
            let host = self.create_host(registry, &host_folder, &vm_folder, &host_name)?;
            registry.mutate(&host_folder, |parent| {
                parent.add_to_set("childEntity", host.to_value());
            })?;
        }
        Ok(datacenter)
    }

    fn create_host(
        &self,
        registry: &Registry,
        host_folder: &ObjectReference,
        vm_folder: &ObjectReference,
        name: &str,
    ) -> Result<ObjectReference, Fault> {
        let host = ObjectReference::new(kinds::HOST_SYSTEM, registry.allocate_id("host"));
        let mut machines = Vec::new();
        for vm_index in 0..self.vms_per_host {
            let vm = ObjectReference::new(kinds::VIRTUAL_MACHINE, registry.allocate_id("vm"));
            let spec = VirtualMachineSpec::new(format!("{name}_VM{vm_index}"));
            registry.put(virtual_machine(&vm, &spec, vm_folder, Some(&host)));
            machines.push(vm);
        }
        registry.put(
            ManagedObject::new(host.clone())
                .with("name", name)
                .with_reference("parent", host_folder)
                .with_references("vm", &machines)
                .with("summary.connectionState", "connected")
                .with("summary.overallStatus", "green")
                .with("hardware.numCpu", HOST_CPUS)
                .with("hardware.memoryMB", HOST_MEMORY_MB),
        );
        let members: Vec<Value> = machines.iter().map(ObjectReference::to_value).collect();
        registry.mutate(vm_folder, |parent| {
            for member in members {
                parent.add_to_set("childEntity", member);
            }
        })?;
        Ok(host)
    }

    /// Counts inventory objects by kind.
    #[must_use]
    pub fn count(registry: &Registry) -> ModelCount {
        ModelCount {
            folders: registry.list(kinds::FOLDER).len(),
            datacenters: registry.list(kinds::DATACENTER).len(),
            hosts: registry.list(kinds::HOST_SYSTEM).len(),
            machines: registry.list(kinds::VIRTUAL_MACHINE).len(),
        }
    }
}
