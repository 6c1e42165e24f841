//! Task and task-manager operations.

use serde_json::Value;

use super::to_value;
use crate::dispatch::{Arguments, Dispatcher, Invocation};
use crate::fault::Fault;
use crate::schema::kinds;
use crate::services::Services;
use crate::task::{NewTask, TaskFilterSpec, TaskState, TaskStateParseError};

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register_service(kinds::TASK, "cancelTask", cancel_task);
    dispatcher.register_service(kinds::TASK, "setTaskState", set_task_state);
    dispatcher.register_service(kinds::TASK, "updateProgress", update_progress);
    dispatcher.register_service(kinds::TASK_MANAGER, "createTask", create_task);
    dispatcher.register_service(
        kinds::TASK_MANAGER,
        "createCollectorForTasks",
        create_collector_for_tasks,
    );
}

fn cancel_task(services: &Services, invocation: &Invocation<'_>, _arguments: &Arguments) -> Result<Value, Fault> {
    services.tasks.cancel(invocation.target)?;
    Ok(Value::Null)
}

fn set_task_state(services: &Services, invocation: &Invocation<'_>, arguments: &Arguments) -> Result<Value, Fault> {
    let state: TaskState = arguments
        .required_str("state")?
        .parse()
        .map_err(|error: TaskStateParseError| Fault::invalid_argument("state", error.to_string()))?;
    let result = arguments.get("result").cloned();
    let fault = arguments.decode::<Fault>("fault")?;
    let task_info = services
        .tasks
        .transition(invocation.target, state, result, fault)?;
    to_value(&task_info)
}

fn update_progress(services: &Services, invocation: &Invocation<'_>, arguments: &Arguments) -> Result<Value, Fault> {
    let requested = arguments
        .optional_u64("percentDone")?
        .ok_or_else(|| Fault::invalid_argument("percentDone", "argument is required"))?;
    let percent = u8::try_from(requested)
        .map_err(|_| Fault::invalid_argument("percentDone", format!("{requested} is not between 0 and 100")))?;
    let task_info = services.tasks.update_progress(invocation.target, percent)?;
    to_value(&task_info)
}

fn create_task(services: &Services, invocation: &Invocation<'_>, arguments: &Arguments) -> Result<Value, Fault> {
    let entity = arguments.required_reference("obj")?;
    let task_type = arguments.required_str("taskTypeId")?;
    let initiator = arguments
        .optional_str("initiatedBy")?
        .unwrap_or(invocation.initiator);
    let cancelable = arguments.optional_bool("cancelable")?.unwrap_or(false);
    let task = services.tasks.create_task(NewTask {
        entity: &entity,
        description_id: task_type,
        initiator,
        cancelable,
    })?;
    to_value(&services.tasks.info(&task)?)
}

fn create_collector_for_tasks(
    services: &Services,
    _invocation: &Invocation<'_>,
    arguments: &Arguments,
) -> Result<Value, Fault> {
    let filter: TaskFilterSpec = arguments.decode("filter")?.unwrap_or_default();
    Ok(services.tasks.create_collector(filter).to_value())
}
