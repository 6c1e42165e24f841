//! Unit tests for the assembled simulator.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use vcsim_config::ModelKind;

use crate::collector::PropertyFilterSpec;
use crate::{
    Fault, Model, ObjectReference, Simulator, SimulatorSettings, TaskFilterSpec, WaitOptions, kinds,
};

fn settings(flavour: ModelKind) -> SimulatorSettings {
    SimulatorSettings {
        flavour,
        task_delay: Duration::ZERO,
        ..SimulatorSettings::default()
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn service_instance_points_at_singletons() {
        let simulator = Simulator::new(settings(ModelKind::Vpx));
        let instance = simulator
            .registry()
            .get(simulator.service_instance())
            .expect("service instance");
        assert_eq!(instance.references("content.rootFolder"), vec![simulator.root_folder().clone()]);
        assert_eq!(
            instance.references("content.taskManager"),
            vec![simulator.tasks().reference().clone()]
        );
        assert_eq!(instance.get_str("about.apiType"), Some("VirtualCenter"));
    }

    #[test]
    fn standalone_host_advertises_host_agent() {
        let simulator = Simulator::with_model(settings(ModelKind::Esx), &Model::esx(1)).expect("simulator");
        let instance = simulator
            .registry()
            .get(simulator.service_instance())
            .expect("service instance");
        assert_eq!(instance.get_str("about.apiType"), Some("HostAgent"));
        assert_eq!(Model::count(simulator.registry()).hosts, 1);
    }

    #[test]
    fn simulators_are_independent() {
        let first = Simulator::with_model(settings(ModelKind::Vpx), &Model::vpx(1, 1, 1)).expect("first");
        let second = Simulator::new(settings(ModelKind::Vpx));
        assert_eq!(Model::count(first.registry()).machines, 1);
        assert_eq!(Model::count(second.registry()).machines, 0);
        first.shutdown();
        assert!(second.registry().contains(second.root_folder()));
    }

    #[test]
    fn shutdown_wakes_waiters_and_clears_registry() {
        let simulator = Simulator::with_model(settings(ModelKind::Vpx), &Model::vpx(1, 1, 1)).expect("simulator");
        let vm = simulator
            .registry()
            .list(kinds::VIRTUAL_MACHINE)
            .into_iter()
            .next()
            .expect("vm");
        let handle = simulator
            .property_collector()
            .create_filter(PropertyFilterSpec::for_object(&vm, ["power.state"]))
            .expect("filter");
        let collector = Arc::clone(simulator.property_collector());
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let outcome = collector.wait_for_updates(&handle.filter, Some(handle.version), WaitOptions::indefinitely());
            sender.send(outcome).ok();
        });
        thread::sleep(Duration::from_millis(50));

        simulator.shutdown();
        let outcome = receiver
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter released");
        assert_eq!(outcome, Err(Fault::Cancelled));
        assert!(simulator.registry().is_empty());
        assert_eq!(simulator.property_collector().filter_count(), 0);
        assert!(simulator.is_shut_down());
        simulator.shutdown();
    }

    #[test]
    fn shutdown_releases_history_collectors() {
        let simulator = Simulator::new(settings(ModelKind::Vpx));
        let collector = simulator.tasks().create_collector(TaskFilterSpec::default());
        simulator.shutdown();
        assert_eq!(simulator.tasks().stream().collector_count(), 0);
        assert!(!simulator.registry().contains(&collector));
    }

    #[test]
    fn builtin_operations_are_listed_per_kind() {
        let simulator = Simulator::new(settings(ModelKind::Vpx));
        let operations = simulator.dispatcher().operations(kinds::VIRTUAL_MACHINE);
        for expected in ["destroy", "markAsTemplate", "powerOff", "powerOffVM", "powerOn", "powerOnVM", "rename"] {
            assert!(operations.iter().any(|name| name == expected), "missing {expected}");
        }
        assert!(simulator.dispatcher().supports(kinds::TASK, "cancelTask"));
        assert!(!simulator.dispatcher().supports(kinds::TASK, "powerOnVM"));
    }

    #[test]
    fn missing_collector_object_is_not_found() {
        let simulator = Simulator::new(settings(ModelKind::Vpx));
        let missing = ObjectReference::new(kinds::TASK_HISTORY_COLLECTOR, "collector-404");
        let fault = simulator
            .invoke(&missing, "readNext", &crate::Arguments::new())
            .expect_err("missing collector");
        assert_eq!(fault, Fault::not_found(&missing));
    }
}

mod behaviour;
