//! Event manager and history collector operations.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::to_value;
use crate::dispatch::{Arguments, Dispatcher, Invocation};
use crate::event::{Event, EventFilterSpec};
use crate::fault::Fault;
use crate::history::HistoryStream;
use crate::schema::kinds;
use crate::services::Services;
use crate::task::TaskInfo;

type StreamOf<T> = for<'a> fn(&'a Services) -> &'a HistoryStream<T>;

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register_service(
        kinds::EVENT_MANAGER,
        "createCollectorForEvents",
        create_collector_for_events,
    );
    dispatcher.register_service(kinds::EVENT_MANAGER, "postEvent", post_event);
    register_collector::<TaskInfo>(dispatcher, kinds::TASK_HISTORY_COLLECTOR, |services| {
        services.tasks.stream()
    });
    register_collector::<Event>(dispatcher, kinds::EVENT_HISTORY_COLLECTOR, |services| {
        services.events.stream()
    });
}

fn create_collector_for_events(
    services: &Services,
    _invocation: &Invocation<'_>,
    arguments: &Arguments,
) -> Result<Value, Fault> {
    let filter: EventFilterSpec = arguments.decode("filter")?.unwrap_or_default();
    Ok(services.events.create_collector(filter).to_value())
}

fn post_event(services: &Services, invocation: &Invocation<'_>, arguments: &Arguments) -> Result<Value, Fault> {
    let event_type = arguments.required_str("eventType")?;
    let object = arguments.optional_reference("obj")?;
    let message = arguments.optional_str("message")?.unwrap_or_default();
    let event = services
        .events
        .post(event_type, object.as_ref(), message, invocation.initiator);
    to_value(&event)
}

fn register_collector<T>(dispatcher: &mut Dispatcher, kind: &str, stream_of: StreamOf<T>)
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    dispatcher.register_service(kind, "readNext", move |services, invocation, arguments| {
        let collector = stream_of(services).collector(invocation.target)?;
        let max_count = arguments
            .optional_usize("maxCount")?
            .unwrap_or_else(|| collector.page_size());
        to_value(&collector.read_next(max_count)?)
    });
    dispatcher.register_service(kind, "readPrev", move |services, invocation, arguments| {
        let collector = stream_of(services).collector(invocation.target)?;
        let max_count = arguments
            .optional_usize("maxCount")?
            .unwrap_or_else(|| collector.page_size());
        to_value(&collector.read_prev(max_count)?)
    });
    dispatcher.register_service(kind, "waitForNext", move |services, invocation, arguments| {
        let collector = stream_of(services).collector(invocation.target)?;
        let bound = wait_bound(services, arguments.optional_u64("maxWaitSeconds")?);
        to_value(&collector.wait_for_new(Some(bound))?)
    });
    dispatcher.register_service(kind, "resetCollector", move |services, invocation, _arguments| {
        stream_of(services)
            .collector(invocation.target)?
            .reset_to_latest()?;
        Ok(Value::Null)
    });
    dispatcher.register_service(kind, "rewindCollector", move |services, invocation, _arguments| {
        stream_of(services).collector(invocation.target)?.rewind()?;
        Ok(Value::Null)
    });
    dispatcher.register_service(kind, "setCollectorPageSize", move |services, invocation, arguments| {
        let page_size = arguments
            .optional_usize("maxCount")?
            .ok_or_else(|| Fault::invalid_argument("maxCount", "argument is required"))?;
        stream_of(services).set_page_size(invocation.target, page_size)?;
        Ok(Value::Null)
    });
    dispatcher.register_service(kind, "destroyCollector", move |services, invocation, _arguments| {
        stream_of(services).destroy_collector(invocation.target)?;
        Ok(Value::Null)
    });
}

fn wait_bound(services: &Services, requested_seconds: Option<u64>) -> Duration {
    let cap = services.settings.max_wait;
    requested_seconds
        .map(Duration::from_secs)
        .map_or(cap, |requested| requested.min(cap))
}
