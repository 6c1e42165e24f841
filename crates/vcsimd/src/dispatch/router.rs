//! Method routing onto the simulator.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use vcsim_core::{Arguments, Fault, Outcome, Simulator, WaitOptions};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::request::{
    CreateFilterParams, DestroyFilterParams, InvokeParams, RequestEnvelope, RetrieveParams,
    WaitParams,
};
use super::response::Response;
use super::session::SessionScope;

/// Routes requests to the simulator's components.
pub(crate) struct MethodRouter {
    simulator: Arc<Simulator>,
    max_wait: Duration,
}

impl MethodRouter {
    /// Creates a router; `max_wait` caps every long poll requested by a
    /// client.
    pub(crate) fn new(simulator: Arc<Simulator>, max_wait: Duration) -> Self {
        Self {
            simulator,
            max_wait,
        }
    }

    /// Routes a request and returns its response. Filters and collectors it
    /// creates or destroys are recorded in `scope`.
    ///
    /// Engine faults are returned as `Ok(Response::Fault)`; only requests the
    /// daemon cannot interpret produce an error.
    pub(crate) fn route(
        &self,
        request: &RequestEnvelope,
        scope: &mut SessionScope,
    ) -> Result<Response, DispatchError> {
        if self.simulator.is_shut_down() {
            return Err(DispatchError::ShuttingDown);
        }
        let method = request.method();
        debug!(target: DISPATCH_TARGET, method, "routing request");
        match method {
            "invoke" => self.invoke(request, scope),
            "retrieveProperties" => self.retrieve_properties(request),
            "createFilter" => self.create_filter(request, scope),
            "waitForUpdates" => self.wait_for_updates(request),
            "destroyFilter" => self.destroy_filter(request, scope),
            other => Err(DispatchError::unknown_method(other)),
        }
    }

    fn invoke(&self, request: &RequestEnvelope, scope: &mut SessionScope) -> Result<Response, DispatchError> {
        let params: InvokeParams = request.params()?;
        let obj = params.obj.resolve(request.method(), "obj")?;
        let arguments = match Arguments::from_value(params.args) {
            Ok(arguments) => arguments,
            Err(fault) => return Ok(Response::fault(fault)),
        };
        let dispatcher = self.simulator.dispatcher();
        let outcome = match params.user.as_deref() {
            Some(user) => dispatcher.dispatch_as(user, &obj, &params.operation, &arguments),
            None => dispatcher.dispatch(&obj, &params.operation, &arguments),
        };
        Ok(match outcome {
            Ok(Outcome::Value(value)) => {
                scope.observe_invoke(&obj, &params.operation, &value);
                Response::result(value)
            }
            Ok(Outcome::Task(task)) => Response::task(task),
            Err(fault) => Response::fault(fault),
        })
    }

    fn retrieve_properties(&self, request: &RequestEnvelope) -> Result<Response, DispatchError> {
        let params: RetrieveParams = request.params()?;
        respond(self.simulator.property_collector().retrieve_properties(&params.specs))
    }

    fn create_filter(&self, request: &RequestEnvelope, scope: &mut SessionScope) -> Result<Response, DispatchError> {
        let params: CreateFilterParams = request.params()?;
        let created = self.simulator.property_collector().create_filter(params.spec);
        if let Ok(handle) = &created {
            scope.adopt_filter(handle.filter.clone());
        }
        respond(created)
    }

    fn wait_for_updates(&self, request: &RequestEnvelope) -> Result<Response, DispatchError> {
        let params: WaitParams = request.params()?;
        let filter = params.filter.resolve(request.method(), "filter")?;
        let options = WaitOptions::at_most(self.wait_bound(params.max_wait_seconds));
        respond(
            self.simulator
                .property_collector()
                .wait_for_updates(&filter, params.version, options),
        )
    }

    fn destroy_filter(&self, request: &RequestEnvelope, scope: &mut SessionScope) -> Result<Response, DispatchError> {
        let params: DestroyFilterParams = request.params()?;
        let filter = params.filter.resolve(request.method(), "filter")?;
        scope.forget_filter(&filter);
        respond(
            self.simulator
                .property_collector()
                .destroy_filter(&filter)
                .map(|()| Value::Null),
        )
    }

    /// Longest a wait may block: the client's bound when it names one, never
    /// more than the configured cap.
    fn wait_bound(&self, requested_seconds: Option<u64>) -> Duration {
        requested_seconds
            .map(Duration::from_secs)
            .map_or(self.max_wait, |requested| requested.min(self.max_wait))
    }
}

fn respond<T: Serialize>(outcome: Result<T, Fault>) -> Result<Response, DispatchError> {
    match outcome {
        Ok(value) => Ok(Response::result(serde_json::to_value(value)?)),
        Err(fault) => Ok(Response::fault(fault)),
    }
}
