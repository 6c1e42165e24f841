//! Behavioural tests for the daemon bootstrap sequence.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use vcsim_core::{Model, kinds};

use crate::bootstrap::BootstrapError;

use super::support::{HealthEvent, TestWorld, test_config};

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

#[given("a configuration with {datacenters} datacenters of {hosts} host running {vms} virtual machines")]
fn given_configuration(world: &RefCell<TestWorld>, datacenters: u32, hosts: u32, vms: u32) {
    world
        .borrow_mut()
        .use_config(test_config(datacenters, hosts, vms));
}

#[given("a configuration that cannot be loaded")]
fn given_failing_configuration(world: &RefCell<TestWorld>) {
    world.borrow_mut().use_failing_loader();
}

#[when("the daemon bootstraps")]
fn when_bootstraps(world: &RefCell<TestWorld>) {
    world.borrow_mut().bootstrap();
}

#[then("bootstrap succeeds")]
fn then_bootstrap_succeeds(world: &RefCell<TestWorld>) {
    let state = world.borrow();
    assert!(!state.daemon().simulator().is_shut_down());
}

#[then("the simulator holds {count} virtual machines")]
fn then_simulator_holds(world: &RefCell<TestWorld>, count: usize) {
    let state = world.borrow();
    let registry = state.daemon().simulator().registry();
    assert_eq!(registry.list(kinds::VIRTUAL_MACHINE).len(), count);
    assert_eq!(Model::count(registry).machines, count);
}

#[then("the health reporter saw the inventory before bootstrap completed")]
fn then_inventory_reported(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    let Some(HealthEvent::InventoryReady(count)) = events.get(1) else {
        panic!("expected inventory_ready as the second event, got {events:?}");
    };
    assert_eq!(count.datacenters, 2);
    assert_eq!(
        events,
        vec![
            HealthEvent::BootstrapStarting,
            HealthEvent::InventoryReady(*count),
            HealthEvent::BootstrapSucceeded,
        ]
    );
}

#[then("bootstrap fails with a configuration error")]
fn then_configuration_error(world: &RefCell<TestWorld>) {
    let state = world.borrow();
    assert!(matches!(
        state.bootstrap_error(),
        BootstrapError::Configuration { .. }
    ));
}

#[then("the health reporter recorded the failure")]
fn then_failure_recorded(world: &RefCell<TestWorld>) {
    assert_eq!(
        world.borrow().reporter.events(),
        vec![HealthEvent::BootstrapStarting, HealthEvent::BootstrapFailed]
    );
}

#[scenario(path = "tests/features/daemon_bootstrap.feature")]
fn daemon_bootstrap(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/bootstrap_failure.feature")]
fn bootstrap_failure(world: RefCell<TestWorld>) {
    let _ = world;
}
