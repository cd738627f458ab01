//! Route keyed endpoints of live controllers
use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    fmt::{Debug, Display},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::ParamError,
    scope::Scope,
    types::{DynError, Instance, TypeInfo},
};

/// Handler bound to its owning controller instance
pub type EndpointHandler = Arc<dyn Fn(&Scope, &Params) -> Result<Value, DynError> + Send + Sync>;

/// One exported operation of one live controller
#[derive(Clone)]
pub struct ControllerEndpoint {
    route: String,
    method: &'static str,
    controller: TypeInfo,
    instance: Instance,
    handler: EndpointHandler,
}
impl Debug for ControllerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerEndpoint")
            .field("route", &self.route)
            .field("controller", &self.controller.type_name)
            .field("method", &self.method)
            .finish()
    }
}
impl Display for ControllerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{} [{}]", self.controller, self.method, self.route)
    }
}

impl ControllerEndpoint {
    pub fn new(
        route: impl Into<String>,
        method: &'static str,
        instance: Instance,
        handler: EndpointHandler,
    ) -> Self {
        ControllerEndpoint {
            route: route.into(),
            method,
            controller: instance.info,
            instance,
            handler,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn controller(&self) -> TypeInfo {
        self.controller
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Calls the bound operation
    pub fn invoke(&self, scope: &Scope, params: &Params) -> Result<Value, DynError> {
        (self.handler)(scope, params)
    }

    /// True if both endpoints run the same handler for the same method on the same instance
    pub fn same_target(&self, other: &ControllerEndpoint) -> bool {
        self.method == other.method
            && self.instance.ptr_eq(&other.instance)
            && std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(&other.handler))
    }
}

/// Two different endpoints claimed the same route
#[derive(Debug, Clone)]
pub struct RouteCollision {
    pub route: String,
    pub kept: ControllerEndpoint,
    pub rejected: ControllerEndpoint,
}

/// Route key -> endpoint mapping, first registration wins
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, ControllerEndpoint>,
    collisions: Vec<RouteCollision>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint under its route
    ///
    /// Returns false if the route was already taken. A different endpoint claiming a taken route
    /// is dropped and recorded as a [RouteCollision].
    pub fn register(&mut self, endpoint: ControllerEndpoint) -> bool {
        match self.endpoints.entry(endpoint.route.clone()) {
            Entry::Vacant(vacant) => {
                tracing::debug!("Mapped {endpoint}");
                vacant.insert(endpoint);
                true
            }
            Entry::Occupied(occupied) => {
                let existing = occupied.get();
                if existing.same_target(&endpoint) {
                    return false;
                }

                tracing::warn!(
                    "Ambiguous mapping for route '{}': keeping {existing}, rejecting {endpoint}",
                    endpoint.route
                );
                self.collisions.push(RouteCollision {
                    route: endpoint.route.clone(),
                    kept: existing.clone(),
                    rejected: endpoint,
                });
                false
            }
        }
    }

    pub fn get(&self, route: &str) -> Option<&ControllerEndpoint> {
        self.endpoints.get(route)
    }

    /// All registered routes, sorted
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn collisions(&self) -> &[RouteCollision] {
        &self.collisions
    }
}

/// Positional and named request parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub named: BTreeMap<String, Value>,
}

impl Params {
    /// Deserializes the positional parameter at `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ParamError> {
        let value = self
            .positional
            .get(index)
            .ok_or(ParamError::MissingPositional(index))?;

        T::deserialize(value).map_err(|error| ParamError::Invalid {
            name: format!("#{index}"),
            error,
        })
    }

    /// Deserializes the named parameter
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ParamError> {
        self.get_opt(name)?
            .ok_or_else(|| ParamError::MissingNamed(name.to_string()))
    }

    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ParamError> {
        match self.named.get(name) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|error| ParamError::Invalid {
                    name: name.to_string(),
                    error,
                }),
        }
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }
}

/// A route key plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub route: String,
    #[serde(default)]
    pub params: Params,
}

impl Request {
    pub fn new(route: impl Into<String>) -> Self {
        Request {
            route: route.into(),
            params: Params::default(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.params.positional.push(value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.named.insert(name.into(), value.into());
        self
    }
}
