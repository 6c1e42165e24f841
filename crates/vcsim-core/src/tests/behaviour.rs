//! Behaviour-driven tests for tasks, filters and long-poll waits.

use std::cell::RefCell;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use crate::collector::{ChangeOp, PropertyFilterSpec, PropertyValue, UpdateSet};
use crate::{
    Arguments, Fault, FilterHandle, ManagedObject, ObjectReference, Simulator, SimulatorSettings,
    TaskInfo, WaitOptions, kinds,
};

#[derive(Default)]
struct World {
    task_delay: Duration,
    simulator: Option<Arc<Simulator>>,
    filter: Option<FilterHandle>,
    task: Option<ObjectReference>,
    finished: Option<TaskInfo>,
    waiter: Option<Receiver<Result<UpdateSet, Fault>>>,
}

impl World {
    fn simulator(&mut self) -> Arc<Simulator> {
        let task_delay = self.task_delay;
        let simulator = self.simulator.get_or_insert_with(|| {
            Arc::new(Simulator::new(SimulatorSettings {
                task_delay,
                ..SimulatorSettings::default()
            }))
        });
        Arc::clone(simulator)
    }

    fn filter(&self) -> FilterHandle {
        self.filter.clone().expect("filter should be created")
    }

    fn task(&self) -> ObjectReference {
        self.task.clone().expect("task should be dispatched")
    }

    fn finished(&self) -> &TaskInfo {
        self.finished.as_ref().expect("task should have finished")
    }
}

#[fixture]
fn world() -> RefCell<World> {
    RefCell::new(World::default())
}

fn vm(id: &str) -> ObjectReference {
    ObjectReference::new(kinds::VIRTUAL_MACHINE, id)
}

#[given("simulated work takes {millis} milliseconds")]
fn given_task_delay(world: &RefCell<World>, millis: u64) {
    world.borrow_mut().task_delay = Duration::from_millis(millis);
}

#[given("a virtual machine {id} that is powered {state}")]
fn given_virtual_machine(world: &RefCell<World>, id: String, state: String) {
    let simulator = world.borrow_mut().simulator();
    simulator.registry().put(
        ManagedObject::new(vm(&id))
            .with("name", id.as_str())
            .with("power.state", state.as_str()),
    );
}

#[given("a filter on {id} watching {path}")]
fn given_filter(world: &RefCell<World>, id: String, path: String) {
    let simulator = world.borrow_mut().simulator();
    let handle = simulator
        .property_collector()
        .create_filter(PropertyFilterSpec::for_object(&vm(&id), [path]))
        .expect("filter should be created");
    world.borrow_mut().filter = Some(handle);
}

#[when("{operation} is dispatched on {id}")]
fn when_dispatched(world: &RefCell<World>, operation: String, id: String) {
    let simulator = world.borrow_mut().simulator();
    let outcome = simulator
        .invoke(&vm(&id), &operation, &Arguments::new())
        .expect("dispatch should succeed");
    let task = outcome.task().cloned().expect("operation should run as a task");
    world.borrow_mut().task = Some(task);
}

#[when("the task is cancelled")]
fn when_task_cancelled(world: &RefCell<World>) {
    let (simulator, task) = {
        let mut world_state = world.borrow_mut();
        (world_state.simulator(), world_state.task())
    };
    simulator.tasks().cancel(&task).expect("cancel should succeed");
}

#[when("the task is followed through the property collector until it finishes")]
fn when_task_followed(world: &RefCell<World>) {
    let (simulator, task) = {
        let mut world_state = world.borrow_mut();
        (world_state.simulator(), world_state.task())
    };
    let collector = simulator.property_collector();
    let handle = collector
        .create_filter(PropertyFilterSpec::for_object(&task, ["info.state"]))
        .expect("task filter");
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut update = collector
        .wait_for_updates(&handle.filter, None, WaitOptions::immediate())
        .expect("initial task state");
    loop {
        let content = collector
            .retrieve_one(&task, ["info.state"])
            .expect("task state");
        let finished = matches!(
            content.get("info.state"),
            Some(PropertyValue::Set(Value::String(state))) if state == "success" || state == "error"
        );
        if finished {
            break;
        }
        assert!(Instant::now() < deadline, "task {task} did not finish");
        update = collector
            .wait_for_updates(
                &handle.filter,
                Some(update.version),
                WaitOptions::at_most(Duration::from_millis(500)),
            )
            .expect("task updates");
    }
    collector
        .destroy_filter(&handle.filter)
        .expect("destroy task filter");
    let task_info = simulator.tasks().info(&task).expect("task info");
    world.borrow_mut().finished = Some(task_info);
}

#[when("a client blocks waiting for updates on the filter")]
fn when_client_blocks(world: &RefCell<World>) {
    let (simulator, handle) = {
        let mut world_state = world.borrow_mut();
        (world_state.simulator(), world_state.filter())
    };
    let collector = Arc::clone(simulator.property_collector());
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let outcome = collector.wait_for_updates(
            &handle.filter,
            Some(handle.version),
            WaitOptions::indefinitely(),
        );
        sender.send(outcome).ok();
    });
    thread::sleep(Duration::from_millis(100));
    world.borrow_mut().waiter = Some(receiver);
}

#[when("the filter is destroyed")]
fn when_filter_destroyed(world: &RefCell<World>) {
    let (simulator, handle) = {
        let mut world_state = world.borrow_mut();
        (world_state.simulator(), world_state.filter())
    };
    simulator
        .property_collector()
        .destroy_filter(&handle.filter)
        .expect("destroy filter");
}

#[then("the task finished with state {state}")]
fn then_task_state(world: &RefCell<World>, state: String) {
    assert_eq!(world.borrow().finished().state.as_str(), state);
}

#[then("the task fault is cancelled")]
fn then_task_cancelled(world: &RefCell<World>) {
    let world_state = world.borrow();
    let task_info = world_state.finished();
    assert_eq!(task_info.error, Some(Fault::Cancelled));
    assert!(task_info.cancelled);
}

#[then("waiting on the filter reports a single change of {path} to {value}")]
fn then_single_change(world: &RefCell<World>, path: String, value: String) {
    let (simulator, handle) = {
        let mut world_state = world.borrow_mut();
        (world_state.simulator(), world_state.filter())
    };
    let update = simulator
        .property_collector()
        .wait_for_updates(
            &handle.filter,
            Some(handle.version),
            WaitOptions::at_most(Duration::from_secs(2)),
        )
        .expect("updates");
    assert_eq!(update.object_set.len(), 1);
    let object_update = update.object_set.first().expect("one object update");
    assert_eq!(object_update.change_set.len(), 1);
    let change = object_update.change_set.first().expect("one change");
    assert_eq!(change.name, path);
    assert_eq!(change.op, ChangeOp::Assign);
    assert_eq!(change.val, Some(Value::String(value)));
}

#[then("retrieving {path} of {id} reports {value}")]
fn then_retrieved(world: &RefCell<World>, path: String, id: String, value: String) {
    let simulator = world.borrow_mut().simulator();
    let content = simulator
        .property_collector()
        .retrieve_one(&vm(&id), [path.as_str()])
        .expect("retrieve");
    assert_eq!(
        content.get(&path),
        Some(&PropertyValue::Set(Value::String(value)))
    );
}

#[then("the blocked wait ends with a cancelled fault")]
fn then_wait_cancelled(world: &RefCell<World>) {
    let receiver = world.borrow_mut().waiter.take().expect("a blocked client");
    let outcome = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("the blocked wait should return promptly");
    assert_eq!(outcome, Err(Fault::Cancelled));
}

#[scenario(path = "tests/features/power_on_notifies_watchers.feature")]
fn power_on_notifies_watchers(world: RefCell<World>) {
    let _ = world;
}

#[scenario(path = "tests/features/destroy_filter_cancels_wait.feature")]
fn destroy_filter_cancels_wait(world: RefCell<World>) {
    let _ = world;
}

#[scenario(path = "tests/features/task_cancellation.feature")]
fn task_cancellation(world: RefCell<World>) {
    let _ = world;
}
