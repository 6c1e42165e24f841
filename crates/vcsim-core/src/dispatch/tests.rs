//! Unit tests for method dispatch and the built-in operations.

use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::model::{Model, POWERED_OFF, POWERED_ON};
use crate::schema::kinds;
use crate::simulator::{Simulator, SimulatorSettings};
use crate::task::TaskInfo;

fn settings() -> SimulatorSettings {
    SimulatorSettings {
        task_delay: Duration::ZERO,
        ..SimulatorSettings::default()
    }
}

#[fixture]
fn simulator() -> Simulator {
    Simulator::with_model(settings(), &Model::vpx(1, 1, 2)).expect("simulator")
}

fn first_vm(simulator: &Simulator) -> ObjectReference {
    simulator
        .registry()
        .list(kinds::VIRTUAL_MACHINE)
        .into_iter()
        .next()
        .expect("a virtual machine")
}

fn await_task(simulator: &Simulator, task: &ObjectReference) -> TaskInfo {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let task_info = simulator.tasks().info(task).expect("task info");
        if task_info.state.is_terminal() {
            return task_info;
        }
        assert!(Instant::now() < deadline, "task {task} did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

fn run(simulator: &Simulator, obj: &ObjectReference, operation: &str, arguments: &Arguments) -> TaskInfo {
    let outcome = simulator
        .invoke(obj, operation, arguments)
        .expect("dispatch");
    let task = outcome.task().expect("asynchronous operation");
    await_task(simulator, task)
}

#[rstest]
fn unknown_object_is_not_found_before_operation_lookup(simulator: Simulator) {
    let missing = ObjectReference::new(kinds::VIRTUAL_MACHINE, "vm-404");
    let fault = simulator
        .invoke(&missing, "noSuchOperation", &Arguments::new())
        .expect_err("missing object");
    assert_eq!(fault, Fault::not_found(&missing));
}

#[rstest]
fn unregistered_operation_is_not_supported(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let fault = simulator
        .invoke(&vm, "explode", &Arguments::new())
        .expect_err("unknown operation");
    assert_eq!(fault, Fault::not_supported(kinds::VIRTUAL_MACHINE, "explode"));
}

#[rstest]
fn power_on_runs_as_task_and_posts_event(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let task_info = run(&simulator, &vm, "powerOnVM", &Arguments::new());
    assert_eq!(task_info.state, TaskState::Success);
    assert_eq!(task_info.description_id, "VirtualMachine.powerOnVM");
    let object = simulator.registry().get(&vm).expect("vm");
    assert_eq!(object.get_str("power.state"), Some(POWERED_ON));
    assert!(object.get("power.bootTime").is_some());
    let latest = simulator
        .registry()
        .get(simulator.events().reference())
        .expect("event manager");
    assert_eq!(latest.get_str("latestEvent.eventType"), Some("VmPoweredOnEvent"));
}

#[rstest]
fn alias_reaches_same_handler(simulator: Simulator) {
    let vm = first_vm(&simulator);
    assert_eq!(run(&simulator, &vm, "powerOn", &Arguments::new()).state, TaskState::Success);
    assert_eq!(run(&simulator, &vm, "powerOff", &Arguments::new()).state, TaskState::Success);
    let object = simulator.registry().get(&vm).expect("vm");
    assert_eq!(object.get_str("power.state"), Some(POWERED_OFF));
    assert!(object.get("power.bootTime").is_none());
}

#[rstest]
fn powering_on_twice_fails_the_second_task(simulator: Simulator) {
    let vm = first_vm(&simulator);
    run(&simulator, &vm, "powerOnVM", &Arguments::new());
    let task_info = run(&simulator, &vm, "powerOnVM", &Arguments::new());
    assert_eq!(task_info.state, TaskState::Error);
    assert!(matches!(
        task_info.error,
        Some(Fault::OperationFault { ref name, .. }) if name == "InvalidPowerState"
    ));
}

#[rstest]
fn templates_cannot_power_on(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let outcome = simulator
        .invoke(&vm, "markAsTemplate", &Arguments::new())
        .expect("mark as template");
    assert_eq!(outcome, Outcome::Value(Value::Null));
    let task_info = run(&simulator, &vm, "powerOnVM", &Arguments::new());
    assert!(matches!(task_info.error, Some(Fault::OperationFault { .. })));
    simulator
        .invoke(&vm, "markAsVirtualMachine", &Arguments::new())
        .expect("mark as virtual machine");
    let fault = simulator
        .invoke(&vm, "markAsVirtualMachine", &Arguments::new())
        .expect_err("no longer a template");
    assert!(matches!(fault, Fault::OperationFault { .. }));
}

#[rstest]
fn running_machine_cannot_become_template(simulator: Simulator) {
    let vm = first_vm(&simulator);
    run(&simulator, &vm, "powerOnVM", &Arguments::new());
    let version = simulator.registry().get(&vm).expect("vm").version();
    let fault = simulator
        .invoke(&vm, "markAsTemplate", &Arguments::new())
        .expect_err("powered on");
    assert!(matches!(fault, Fault::OperationFault { ref name, .. } if name == "InvalidPowerState"));
    assert_eq!(simulator.registry().get(&vm).expect("vm").version(), version);
}

#[rstest]
fn rename_updates_name(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let arguments = Arguments::new().with("newName", "renamed");
    assert_eq!(run(&simulator, &vm, "rename", &arguments).state, TaskState::Success);
    assert_eq!(
        simulator.registry().get(&vm).expect("vm").get_str("name"),
        Some("renamed")
    );
}

#[rstest]
fn destroy_removes_machine_and_links(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let object = simulator.registry().get(&vm).expect("vm");
    let parent = object.references("parent").into_iter().next().expect("parent");
    let host = object.references("runtime.host").into_iter().next().expect("host");

    let task_info = run(&simulator, &vm, "destroy", &Arguments::new());
    assert_eq!(task_info.state, TaskState::Success);
    assert!(!simulator.registry().contains(&vm));
    let children = simulator.registry().get(&parent).expect("folder").references("childEntity");
    assert!(!children.contains(&vm));
    let hosted = simulator.registry().get(&host).expect("host").references("vm");
    assert!(!hosted.contains(&vm));
}

#[rstest]
fn powered_on_machine_is_not_destroyed(simulator: Simulator) {
    let vm = first_vm(&simulator);
    run(&simulator, &vm, "powerOnVM", &Arguments::new());
    let task_info = run(&simulator, &vm, "destroy", &Arguments::new());
    assert_eq!(task_info.state, TaskState::Error);
    assert!(matches!(task_info.error, Some(Fault::OperationFault { ref name, .. }) if name == "InvalidPowerState"));
    assert!(simulator.registry().contains(&vm));
}

#[test]
fn destroy_racing_power_on_never_removes_a_running_machine() {
    for _ in 0..50 {
        let simulator = Simulator::with_model(settings(), &Model::vpx(1, 1, 1)).expect("simulator");
        let vm = first_vm(&simulator);
        let power_on = simulator
            .invoke(&vm, "powerOnVM", &Arguments::new())
            .expect("dispatch power on");
        let destroy = simulator
            .invoke(&vm, "destroy", &Arguments::new())
            .expect("dispatch destroy");
        let powered_on = await_task(&simulator, power_on.task().expect("power on task"));
        let destroyed = await_task(&simulator, destroy.task().expect("destroy task"));
        assert!(
            !(powered_on.state == TaskState::Success && destroyed.state == TaskState::Success),
            "a machine was destroyed after powering on"
        );
        if destroyed.state == TaskState::Error {
            let machine = simulator.registry().get(&vm).expect("machine kept");
            assert_eq!(machine.get_str("power.state"), Some(POWERED_ON));
        }
    }
}

#[test]
fn create_vm_into_vanished_folder_leaves_no_machine() {
    let simulator = Simulator::with_model(
        SimulatorSettings {
            task_delay: Duration::from_millis(100),
            ..SimulatorSettings::default()
        },
        &Model::vpx(1, 1, 1),
    )
    .expect("simulator");
    let vm = first_vm(&simulator);
    let folder = simulator
        .registry()
        .get(&vm)
        .expect("vm")
        .references("parent")
        .into_iter()
        .next()
        .expect("folder");
    let before = simulator.registry().list(kinds::VIRTUAL_MACHINE);

    let outcome = simulator
        .invoke(&folder, "createVM", &Arguments::new().with("name", "orphan"))
        .expect("dispatch");
    simulator.registry().remove(&folder).expect("remove folder");
    let task_info = await_task(&simulator, outcome.task().expect("task"));
    assert_eq!(task_info.state, TaskState::Error);
    assert_eq!(task_info.error, Some(Fault::not_found(&folder)));
    assert_eq!(simulator.registry().list(kinds::VIRTUAL_MACHINE), before);
}

#[rstest]
fn create_vm_links_new_machine(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let object = simulator.registry().get(&vm).expect("vm");
    let folder = object.references("parent").into_iter().next().expect("folder");
    let host = object.references("runtime.host").into_iter().next().expect("host");

    let arguments = Arguments::new()
        .with("name", "fresh")
        .with("host", host.to_value());
    let task_info = run(&simulator, &folder, "createVM", &arguments);
    let created = task_info
        .result
        .as_ref()
        .and_then(ObjectReference::from_value)
        .expect("created reference");
    let machine = simulator.registry().get(&created).expect("new vm");
    assert_eq!(machine.get_str("name"), Some("fresh"));
    assert!(simulator.registry().get(&folder).expect("folder").references("childEntity").contains(&created));
    assert!(simulator.registry().get(&host).expect("host").references("vm").contains(&created));
}

#[rstest]
fn panicking_handler_becomes_operation_fault(simulator: Simulator) {
    let mut dispatcher = Dispatcher::new(Arc::clone(simulator.services()));
    dispatcher.register_mutation(kinds::VIRTUAL_MACHINE, "crash", |_, vm, _| {
        vm.set("name", "half-written");
        panic!("boom");
    });
    let vm = first_vm(&simulator);
    let before = simulator.registry().get(&vm).expect("vm");
    let fault = dispatcher
        .dispatch(&vm, "crash", &Arguments::new())
        .expect_err("panic");
    assert!(matches!(fault, Fault::OperationFault { ref name, .. } if name == "HandlerPanicked"));
    assert_eq!(simulator.registry().get(&vm).expect("vm"), before);
}

#[rstest]
fn cancelled_task_stops_at_checkpoint(simulator: Simulator) {
    let mut dispatcher = Dispatcher::new(Arc::clone(simulator.services()));
    dispatcher.register_task(kinds::VIRTUAL_MACHINE, "spin", true, |context, _| loop {
        context.checkpoint()?;
        thread::sleep(Duration::from_millis(2));
    });
    let vm = first_vm(&simulator);
    let outcome = dispatcher
        .dispatch(&vm, "spin", &Arguments::new())
        .expect("dispatch");
    let task = outcome.task().expect("task").clone();
    simulator.tasks().cancel(&task).expect("cancel");
    let task_info = await_task(&simulator, &task);
    dispatcher.join_workers();
    assert_eq!(task_info.state, TaskState::Error);
    assert_eq!(task_info.error, Some(Fault::Cancelled));
    assert!(task_info.cancelled);
}

#[rstest]
fn task_operations_drive_extension_tasks(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let manager = simulator.tasks().reference().clone();
    let created = simulator
        .invoke(
            &manager,
            "createTask",
            &Arguments::new()
                .with("obj", vm.to_value())
                .with("taskTypeId", "com.example.backup")
                .with("cancelable", true),
        )
        .expect("create task");
    let task_info: TaskInfo = serde_json::from_value(created.value().cloned().expect("value")).expect("task info");
    assert_eq!(task_info.state, TaskState::Queued);

    let task = task_info.task;
    let bad_state = simulator
        .invoke(&task, "setTaskState", &Arguments::new().with("state", "paused"))
        .expect_err("unknown state");
    assert!(matches!(bad_state, Fault::InvalidArgument { .. }));

    simulator
        .invoke(&task, "setTaskState", &Arguments::new().with("state", "running"))
        .expect("start");
    simulator
        .invoke(&task, "updateProgress", &Arguments::new().with("percentDone", 60))
        .expect("progress");
    simulator
        .invoke(
            &task,
            "setTaskState",
            &Arguments::new().with("state", "success").with("result", json!({"files": 3})),
        )
        .expect("finish");
    let finished = simulator.tasks().info(&task).expect("info");
    assert_eq!(finished.result, Some(json!({"files": 3})));
}

#[rstest]
fn history_collectors_page_through_dispatch(simulator: Simulator) {
    let vm = first_vm(&simulator);
    let collector = simulator
        .invoke(
            simulator.tasks().reference(),
            "createCollectorForTasks",
            &Arguments::new().with("filter", json!({"entity": vm.to_value()})),
        )
        .expect("collector");
    let collector_ref = collector
        .value()
        .and_then(ObjectReference::from_value)
        .expect("collector reference");
    run(&simulator, &vm, "powerOnVM", &Arguments::new());

    let page = simulator
        .invoke(&collector_ref, "readNext", &Arguments::new().with("maxCount", 2))
        .expect("read next");
    assert_eq!(page.value().and_then(Value::as_array).map(Vec::len), Some(2));
    simulator
        .invoke(&collector_ref, "destroyCollector", &Arguments::new())
        .expect("destroy");
    let fault = simulator
        .invoke(&collector_ref, "readNext", &Arguments::new())
        .expect_err("destroyed");
    assert_eq!(fault, Fault::not_found(&collector_ref));
}

#[rstest]
fn post_event_reaches_event_collector(simulator: Simulator) {
    let events = simulator.events().reference().clone();
    let collector = simulator
        .invoke(
            &events,
            "createCollectorForEvents",
            &Arguments::new().with("filter", json!({"eventTypes": ["CustomEvent"]})),
        )
        .expect("collector")
        .value()
        .and_then(ObjectReference::from_value)
        .expect("collector reference");
    simulator
        .invoke(
            &events,
            "postEvent",
            &Arguments::new().with("eventType", "CustomEvent").with("message", "hello"),
        )
        .expect("post");
    let page = simulator
        .invoke(&collector, "readNext", &Arguments::new())
        .expect("read next");
    let messages: Vec<&str> = page
        .value()
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| item.get("message").and_then(Value::as_str)).collect())
        .unwrap_or_default();
    assert_eq!(messages, vec!["hello"]);
}

#[rstest]
fn destroying_collector_releases_blocked_wait(simulator: Simulator) {
    let simulator = Arc::new(simulator);
    let collector = simulator
        .invoke(simulator.tasks().reference(), "createCollectorForTasks", &Arguments::new())
        .expect("collector")
        .value()
        .and_then(ObjectReference::from_value)
        .expect("collector reference");
    let waiter = {
        let simulator = Arc::clone(&simulator);
        let collector = collector.clone();
        thread::spawn(move || {
            simulator.invoke(&collector, "waitForNext", &Arguments::new().with("maxWaitSeconds", 30))
        })
    };
    thread::sleep(Duration::from_millis(50));
    simulator
        .invoke(&collector, "destroyCollector", &Arguments::new())
        .expect("destroy");
    let outcome = waiter.join().expect("waiter thread");
    assert_eq!(outcome, Err(Fault::Cancelled));
}
