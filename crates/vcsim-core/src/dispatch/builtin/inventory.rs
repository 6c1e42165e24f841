//! Inventory operations: power, templates, rename, destroy and creation.

use serde_json::Value;
use tracing::debug;

use super::timestamp;
use crate::dispatch::{Arguments, DISPATCH_TARGET, Dispatcher, TaskContext};
use crate::fault::Fault;
use crate::model::{self, POWERED_OFF, POWERED_ON, VirtualMachineSpec};
use crate::object::ManagedObject;
use crate::reference::ObjectReference;
use crate::registry::Registry;
use crate::schema::kinds;
use crate::services::Services;

pub(super) fn register(dispatcher: &mut Dispatcher) {
    let vm = kinds::VIRTUAL_MACHINE;
    dispatcher.register_task(vm, "powerOnVM", true, power_on);
    dispatcher.register_task(vm, "powerOffVM", true, power_off);
    dispatcher.alias(vm, "powerOn", "powerOnVM");
    dispatcher.alias(vm, "powerOff", "powerOffVM");
    dispatcher.register_mutation(vm, "markAsTemplate", mark_as_template);
    dispatcher.register_mutation(vm, "markAsVirtualMachine", mark_as_virtual_machine);
    dispatcher.register_task(vm, "destroy", false, destroy);
    for kind in [kinds::FOLDER, kinds::DATACENTER, kinds::HOST_SYSTEM, kinds::VIRTUAL_MACHINE] {
        dispatcher.register_task(kind, "rename", false, rename);
    }
    dispatcher.register_task(kinds::FOLDER, "createVM", false, create_vm);
}

fn display_name(object: &ManagedObject) -> String {
    object
        .get_str("name")
        .map_or_else(|| object.reference().to_string(), str::to_owned)
}

fn ensure_power_state(vm: &ManagedObject, expected: &str) -> Result<(), Fault> {
    let current = vm.get_str("power.state").unwrap_or(POWERED_OFF);
    if current == expected {
        Ok(())
    } else {
        Err(Fault::operation(
            "InvalidPowerState",
            format!("{} is powered {current}; expected {expected}", vm.reference()),
        ))
    }
}

fn power_on(context: &TaskContext, _arguments: &Arguments) -> Result<Value, Fault> {
    context.simulate_work()?;
    context.progress(50)?;
    let name = context.mutate_target(|vm| {
        if vm.flag("config.template") {
            return Err(Fault::operation(
                "NotSupported",
                format!("{} is a template and cannot be powered on", vm.reference()),
            ));
        }
        ensure_power_state(vm, POWERED_OFF)?;
        vm.set("power.state", POWERED_ON);
        vm.set("power.bootTime", timestamp()?);
        Ok(display_name(vm))
    })?;
    context.post_event("VmPoweredOnEvent", format!("{name} is powered on"));
    Ok(Value::Null)
}

fn power_off(context: &TaskContext, _arguments: &Arguments) -> Result<Value, Fault> {
    context.simulate_work()?;
    context.progress(50)?;
    let name = context.mutate_target(|vm| {
        ensure_power_state(vm, POWERED_ON)?;
        vm.set("power.state", POWERED_OFF);
        vm.remove("power.bootTime");
        Ok(display_name(vm))
    })?;
    context.post_event("VmPoweredOffEvent", format!("{name} is powered off"));
    Ok(Value::Null)
}

fn mark_as_template(_services: &Services, vm: &mut ManagedObject, _arguments: &Arguments) -> Result<Value, Fault> {
    if vm.flag("config.template") {
        return Err(Fault::operation(
            "NotSupported",
            format!("{} is already a template", vm.reference()),
        ));
    }
    ensure_power_state(vm, POWERED_OFF)?;
    vm.set("config.template", true);
    Ok(Value::Null)
}

fn mark_as_virtual_machine(
    _services: &Services,
    vm: &mut ManagedObject,
    _arguments: &Arguments,
) -> Result<Value, Fault> {
    if !vm.flag("config.template") {
        return Err(Fault::operation(
            "NotSupported",
            format!("{} is not a template", vm.reference()),
        ));
    }
    vm.set("config.template", false);
    Ok(Value::Null)
}

fn rename(context: &TaskContext, arguments: &Arguments) -> Result<Value, Fault> {
    let new_name = arguments.required_str("newName")?.trim();
    if new_name.is_empty() {
        return Err(Fault::invalid_argument("newName", "name must not be empty"));
    }
    context.simulate_work()?;
    let old_name = context.mutate_target(|entity| {
        let previous = display_name(entity);
        entity.set("name", new_name);
        Ok(previous)
    })?;
    context.post_event(
        "EntityRenamedEvent",
        format!("{old_name} renamed to {new_name}"),
    );
    Ok(Value::Null)
}

fn destroy(context: &TaskContext, _arguments: &Arguments) -> Result<Value, Fault> {
    context.simulate_work()?;
    let removed = context.remove_target_if(|vm| ensure_power_state(vm, POWERED_OFF))?;
    let registry = &context.services().registry;
    let member = context.target().to_value();
    for folder in removed.references("parent") {
        unlink(registry, &folder, "childEntity", &member);
    }
    for host in removed.references("runtime.host") {
        unlink(registry, &host, "vm", &member);
    }
    context.post_event(
        "VmRemovedEvent",
        format!("{} was removed", display_name(&removed)),
    );
    Ok(Value::Null)
}

fn unlink(registry: &Registry, owner: &ObjectReference, path: &str, member: &Value) {
    let unlinked = registry.mutate(owner, |object| {
        object.remove_from_set(path, member);
    });
    if let Err(fault) = unlinked {
        debug!(target: DISPATCH_TARGET, owner = %owner, %fault, "owner already gone");
    }
}

fn create_vm(context: &TaskContext, arguments: &Arguments) -> Result<Value, Fault> {
    let services = context.services();
    let name = arguments.required_str("name")?;
    let host = arguments.optional_reference("host")?;
    if let Some(candidate) = &host {
        if !candidate.is_kind(kinds::HOST_SYSTEM) || !services.registry.contains(candidate) {
            return Err(Fault::invalid_argument(
                "host",
                format!("{candidate} is not a known host"),
            ));
        }
    }
    let mut spec = VirtualMachineSpec::new(name);
    if let Some(num_cpu) = arguments.optional_u64("numCpu")? {
        spec.num_cpu = num_cpu;
    }
    if let Some(memory_mb) = arguments.optional_u64("memoryMB")? {
        spec.memory_mb = memory_mb;
    }
    context.simulate_work()?;

    let folder = context.target();
    let vm = ObjectReference::new(kinds::VIRTUAL_MACHINE, services.registry.allocate_id("vm"));
    services
        .registry
        .put(model::virtual_machine(&vm, &spec, folder, host.as_ref()));
    if let Err(fault) = link_new_machine(&services.registry, folder, host.as_ref(), &vm) {
        unlink(&services.registry, folder, "childEntity", &vm.to_value());
        if services.registry.remove(&vm).is_err() {
            debug!(target: DISPATCH_TARGET, vm = %vm, "unlinked machine already removed");
        }
        return Err(fault);
    }
    services.events.post(
        "VmCreatedEvent",
        Some(&vm),
        format!("{name} was created"),
        context.initiator(),
    );
    Ok(vm.to_value())
}

fn link_new_machine(
    registry: &Registry,
    folder: &ObjectReference,
    host: Option<&ObjectReference>,
    vm: &ObjectReference,
) -> Result<(), Fault> {
    registry.mutate(folder, |parent| {
        parent.add_to_set("childEntity", vm.to_value());
    })?;
    if let Some(owner) = host {
        registry.mutate(owner, |host_object| {
            host_object.add_to_set("vm", vm.to_value());
        })?;
    }
    Ok(())
}
