//! Unit tests for property retrieval and filters.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::object::ManagedObject;
use crate::schema::kinds;

struct Inventory {
    registry: Arc<Registry>,
    collector: Arc<PropertyCollector>,
}

fn vm(id: &str) -> ObjectReference {
    ObjectReference::new(kinds::VIRTUAL_MACHINE, id)
}

fn folder(id: &str) -> ObjectReference {
    ObjectReference::new(kinds::FOLDER, id)
}

#[fixture]
fn inventory() -> Inventory {
    let registry = Arc::new(Registry::new());
    let collector = PropertyCollector::new(Arc::clone(&registry), Arc::new(Catalog::builtin()));
    registry.put(
        ManagedObject::new(folder("group-v1"))
            .with("name", "vm")
            .with_references("childEntity", [&vm("vm-1"), &folder("group-v2")]),
    );
    registry.put(
        ManagedObject::new(folder("group-v2"))
            .with("name", "nested")
            .with_references("childEntity", [&vm("vm-2")]),
    );
    for (id, name) in [("vm-1", "web"), ("vm-2", "db")] {
        registry.put(
            ManagedObject::new(vm(id))
                .with("name", name)
                .with("power.state", "off"),
        );
    }
    Inventory {
        registry,
        collector,
    }
}

fn folder_walk() -> PropertyFilterSpec {
    let recurse = TraversalSpec::new("visitFolders", kinds::FOLDER, "childEntity")
        .select(SelectionSpec::named("visitFolders"));
    PropertyFilterSpec::default()
        .with_object(ObjectSpec::new(folder("group-v1")).skipped().select(recurse.into()))
        .with_properties(PropertySpec::new(kinds::VIRTUAL_MACHINE, ["name"]))
}

#[rstest]
fn retrieves_requested_paths(inventory: Inventory) {
    let content = inventory
        .collector
        .retrieve_one(&vm("vm-1"), ["name", "power.state"])
        .expect("retrieve");
    assert_eq!(content.get("name"), Some(&PropertyValue::Set(json!("web"))));
    assert_eq!(
        content.get("power.state"),
        Some(&PropertyValue::Set(json!("off")))
    );
}

#[rstest]
fn declared_but_absent_path_is_unset(inventory: Inventory) {
    let content = inventory
        .collector
        .retrieve_one(&vm("vm-1"), ["config.template"])
        .expect("retrieve");
    assert_eq!(content.get("config.template"), Some(&PropertyValue::Unset));
}

#[rstest]
fn undeclared_path_is_rejected(inventory: Inventory) {
    let fault = inventory
        .collector
        .retrieve_one(&vm("vm-1"), ["power.bogus"])
        .expect_err("undeclared path");
    assert_eq!(
        fault,
        Fault::invalid_property(kinds::VIRTUAL_MACHINE, "power.bogus")
    );
}

#[rstest]
fn missing_starting_object_is_not_found(inventory: Inventory) {
    let fault = inventory
        .collector
        .retrieve_one(&vm("vm-404"), ["name"])
        .expect_err("missing object");
    assert_eq!(fault, Fault::not_found(&vm("vm-404")));
}

#[rstest]
fn all_reports_every_top_level_field(inventory: Inventory) {
    let spec = PropertyFilterSpec::default()
        .with_object(ObjectSpec::new(vm("vm-1")))
        .with_properties(PropertySpec::all(kinds::VIRTUAL_MACHINE));
    let contents = inventory
        .collector
        .retrieve_properties(&[spec])
        .expect("retrieve");
    let content = contents.first().expect("one object");
    assert!(content.get("name").is_some_and(PropertyValue::is_set));
    assert_eq!(content.get("parent"), Some(&PropertyValue::Unset));
}

#[rstest]
fn recursive_traversal_reaches_nested_objects(inventory: Inventory) {
    let contents = inventory
        .collector
        .retrieve_properties(&[folder_walk()])
        .expect("retrieve");
    let reached: Vec<&ObjectReference> = contents.iter().map(|content| &content.obj).collect();
    assert_eq!(reached, vec![&vm("vm-1"), &vm("vm-2")]);
}

#[rstest]
fn traversal_cycle_is_rejected(inventory: Inventory) {
    inventory
        .registry
        .mutate(&folder("group-v2"), |object| {
            object.add_to_set("childEntity", folder("group-v1").to_value());
        })
        .expect("introduce cycle");
    let fault = inventory
        .collector
        .retrieve_properties(&[folder_walk()])
        .expect_err("cycle");
    assert!(matches!(fault, Fault::InvalidArgument { .. }));
}

#[rstest]
fn undefined_named_selection_is_rejected(inventory: Inventory) {
    let spec = PropertyFilterSpec::default()
        .with_object(ObjectSpec::new(folder("group-v1")).select(SelectionSpec::named("nowhere")))
        .with_properties(PropertySpec::new(kinds::FOLDER, ["name"]));
    let fault = inventory
        .collector
        .retrieve_properties(&[spec])
        .expect_err("undefined selection");
    assert!(matches!(fault, Fault::InvalidArgument { .. }));
}

#[rstest]
fn first_wait_without_token_returns_everything(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]))
        .expect("create filter");
    let update = inventory
        .collector
        .wait_for_updates(&handle.filter, None, WaitOptions::immediate())
        .expect("wait");
    let object = update.update_for(&vm("vm-1")).expect("object entered");
    assert_eq!(object.kind, ObjectUpdateKind::Enter);
    assert_eq!(
        object.change_set,
        vec![PropertyChange::assign("name", json!("web"))]
    );
    assert!(update.version > handle.version);
}

#[rstest]
fn wait_reports_only_changed_properties(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name", "power.state"]))
        .expect("create filter");
    inventory
        .registry
        .mutate(&vm("vm-1"), |object| object.set("power.state", "on"))
        .expect("power on");
    let update = inventory
        .collector
        .wait_for_updates(&handle.filter, Some(handle.version), WaitOptions::immediate())
        .expect("wait");
    let object = update.update_for(&vm("vm-1")).expect("object modified");
    assert_eq!(object.kind, ObjectUpdateKind::Modify);
    assert_eq!(
        object.change_set,
        vec![PropertyChange::assign("power.state", json!("on"))]
    );
}

#[rstest]
fn timeout_returns_empty_set_with_same_token(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]))
        .expect("create filter");
    let update = inventory
        .collector
        .wait_for_updates(
            &handle.filter,
            Some(handle.version),
            WaitOptions::at_most(Duration::from_millis(20)),
        )
        .expect("wait");
    assert!(update.is_empty());
    assert_eq!(update.version, handle.version);
}

#[rstest]
fn irrelevant_change_does_not_end_wait(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]))
        .expect("create filter");
    inventory
        .registry
        .mutate(&vm("vm-1"), |object| object.set("power.state", "on"))
        .expect("unrelated change");
    let update = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect("check");
    assert!(update.is_empty());
}

#[rstest]
fn retrying_previous_token_replays_changes(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]))
        .expect("create filter");
    inventory
        .registry
        .mutate(&vm("vm-1"), |object| object.set("name", "web-renamed"))
        .expect("rename");
    let first = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect("first wait");
    let replay = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect("retry");
    assert_eq!(first.object_set, replay.object_set);

    let acknowledged = inventory
        .collector
        .check_for_updates(&handle.filter, Some(replay.version))
        .expect("acknowledge");
    assert!(acknowledged.is_empty());

    let fault = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect_err("superseded token");
    assert_eq!(fault, Fault::invalid_collector_version(handle.version));
}

#[rstest]
fn removed_object_leaves_the_view(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(folder_walk())
        .expect("create filter");
    inventory.registry.remove(&vm("vm-2")).expect("remove vm");
    let update = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect("check");
    let object = update.update_for(&vm("vm-2")).expect("object left");
    assert_eq!(object.kind, ObjectUpdateKind::Leave);
}

#[rstest]
fn object_stored_again_reports_its_changes(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["power.state"]))
        .expect("create filter");
    inventory.registry.remove(&vm("vm-1")).expect("remove vm");
    inventory.registry.put(
        ManagedObject::new(vm("vm-1"))
            .with("name", "web")
            .with("power.state", "on"),
    );
    let update = inventory
        .collector
        .check_for_updates(&handle.filter, Some(handle.version))
        .expect("check");
    let object = update.update_for(&vm("vm-1")).expect("object changed");
    assert_eq!(
        object.change_set,
        vec![PropertyChange::assign("power.state", json!("on"))]
    );
}

#[rstest]
fn new_child_enters_traversal_view(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(folder_walk())
        .expect("create filter");
    inventory
        .registry
        .put(ManagedObject::new(vm("vm-3")).with("name", "cache"));
    inventory
        .registry
        .mutate(&folder("group-v2"), |object| {
            object.add_to_set("childEntity", vm("vm-3").to_value());
        })
        .expect("link vm");
    let update = inventory
        .collector
        .wait_for_updates(
            &handle.filter,
            Some(handle.version),
            WaitOptions::at_most(Duration::from_secs(1)),
        )
        .expect("wait");
    let object = update.update_for(&vm("vm-3")).expect("object entered");
    assert_eq!(object.kind, ObjectUpdateKind::Enter);
}

#[rstest]
fn blocked_wait_wakes_on_change(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["power.state"]))
        .expect("create filter");
    let waiter = {
        let collector = Arc::clone(&inventory.collector);
        let filter = handle.filter.clone();
        thread::spawn(move || {
            collector.wait_for_updates(&filter, Some(handle.version), WaitOptions::indefinitely())
        })
    };
    thread::sleep(Duration::from_millis(20));
    inventory
        .registry
        .mutate(&vm("vm-1"), |object| object.set("power.state", "on"))
        .expect("power on");
    let update = waiter.join().expect("waiter thread").expect("wait result");
    assert_eq!(update.object_set.len(), 1);
}

#[rstest]
fn destroying_filter_cancels_blocked_wait(inventory: Inventory) {
    let handle = inventory
        .collector
        .create_filter(PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]))
        .expect("create filter");
    let waiter = {
        let collector = Arc::clone(&inventory.collector);
        let filter = handle.filter.clone();
        thread::spawn(move || {
            collector.wait_for_updates(&filter, Some(handle.version), WaitOptions::indefinitely())
        })
    };
    thread::sleep(Duration::from_millis(20));
    inventory
        .collector
        .destroy_filter(&handle.filter)
        .expect("destroy");
    let result = waiter.join().expect("waiter thread");
    assert_eq!(result, Err(Fault::Cancelled));
    assert_eq!(inventory.collector.filter_count(), 0);
}

#[rstest]
fn filters_track_versions_independently(inventory: Inventory) {
    let spec = PropertyFilterSpec::for_object(&vm("vm-1"), ["name"]);
    let first = inventory
        .collector
        .create_filter(spec.clone())
        .expect("first filter");
    let second = inventory.collector.create_filter(spec).expect("second filter");
    inventory
        .registry
        .mutate(&vm("vm-1"), |object| object.set("name", "web-2"))
        .expect("rename");
    let from_first = inventory
        .collector
        .check_for_updates(&first.filter, Some(first.version))
        .expect("first check");
    inventory
        .collector
        .check_for_updates(&first.filter, Some(from_first.version))
        .expect("acknowledge first");
    let from_second = inventory
        .collector
        .check_for_updates(&second.filter, Some(second.version))
        .expect("second check");
    assert_eq!(from_first.object_set, from_second.object_set);
}
