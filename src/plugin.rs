//! Plugins: test doubles that perform their own sub-routing.
//!
//! A plugin is mounted in a factory under the request key it owns, and is selected by the
//! normal comparison step like any other expectation. Once selected, it inspects the
//! request (e.g. a field of its JSON body) to decide which response to hand back.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::BoxError;
use crate::factory::RequestKey;
use crate::request::CanonicalRequest;
use crate::response_template::ResponseTemplate;
use crate::tracked::ResponseTrackingList;

/// The outcome of a plugin's internal routing.
#[derive(Debug)]
pub enum Routed<'a> {
    /// One of the plugin's own tracking lists: the store consumes it with the standard
    /// over-call policy.
    Tracked(&'a mut ResponseTrackingList),
    /// A response the plugin produced itself. No call counting takes place.
    Response(ResponseTemplate),
    /// The plugin owns the endpoint but has nothing for this request.
    Unrouted,
}

/// A test double that routes requests to responses on its own.
///
/// Errors returned by [`get_plugin_responses`](PluginRouter::get_plugin_responses) are
/// surfaced as [`Error::UnhandledPlugin`](crate::Error::UnhandledPlugin), unless they
/// already are a [`crate::Error`].
pub trait PluginRouter: Send + Sync {
    /// Used in diagnostics.
    fn name(&self) -> &str;

    /// The key this plugin is mounted under in its factory.
    fn route_key(&self) -> RequestKey;

    fn get_plugin_responses<'a>(
        &'a mut self,
        request: &CanonicalRequest,
    ) -> Result<Routed<'a>, BoxError>;
}

/// Routes on two fields of a JSON request body: a service name, then a parameter.
///
/// Useful when many logical services hide behind a single endpoint, e.g. an RPC gateway
/// receiving `{"service": "maps", "params": {"id": "3"}}`. A route registered with the
/// parameter `*` answers any parameter value of its service that has no exact route.
#[derive(Debug)]
pub struct JsonFieldRouter {
    name: String,
    key: RequestKey,
    service_pointer: String,
    parameter_pointer: String,
    routes: BTreeMap<String, BTreeMap<String, ResponseTrackingList>>,
}

impl JsonFieldRouter {
    /// `service_pointer` and `parameter_pointer` are JSON pointers, e.g. `/service` and
    /// `/params/id`.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<RequestKey>,
        service_pointer: impl Into<String>,
        parameter_pointer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            service_pointer: service_pointer.into(),
            parameter_pointer: parameter_pointer.into(),
            routes: BTreeMap::new(),
        }
    }

    pub fn route(
        mut self,
        service: impl Into<String>,
        parameter: impl Into<String>,
        responses: ResponseTrackingList,
    ) -> Self {
        self.routes
            .entry(service.into())
            .or_default()
            .insert(parameter.into(), responses);
        self
    }
}

fn field(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl PluginRouter for JsonFieldRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn route_key(&self) -> RequestKey {
        self.key.clone()
    }

    fn get_plugin_responses<'a>(
        &'a mut self,
        request: &CanonicalRequest,
    ) -> Result<Routed<'a>, BoxError> {
        let body: Value = request.body_json()?;
        let Some(service) = field(&body, &self.service_pointer) else {
            return Ok(Routed::Unrouted);
        };
        let Some(by_parameter) = self.routes.get_mut(&service) else {
            return Ok(Routed::Unrouted);
        };
        let parameter = field(&body, &self.parameter_pointer).unwrap_or_default();
        let key = if by_parameter.contains_key(&parameter) {
            parameter
        } else {
            "*".to_owned()
        };
        Ok(match by_parameter.get_mut(&key) {
            Some(list) => Routed::Tracked(list),
            None => Routed::Unrouted,
        })
    }
}
