//! Built-in operations of the simulated inventory.

mod history;
mod inventory;
mod tasks;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::Dispatcher;
use crate::fault::Fault;

pub(super) fn register(dispatcher: &mut Dispatcher) {
    inventory::register(dispatcher);
    tasks::register(dispatcher);
    history::register(dispatcher);
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Fault> {
    serde_json::to_value(value).map_err(|error| Fault::operation("EncodingFailed", error.to_string()))
}

fn timestamp() -> Result<String, Fault> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|error| Fault::operation("EncodingFailed", error.to_string()))
}
