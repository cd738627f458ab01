use std::sync::Arc;

use futures::task::SpawnError;
use thiserror::Error;

use crate::types::{DynError, TypeInfo};

/// Errors when trying to require a certain value from a scope
#[derive(Error, Debug, Clone)]
pub enum RequireError {
    /// The required type is not known to the scope or any of its parents
    #[error("The required type '{0}' is not known.")]
    TypeMissing(&'static str),
    /// No entry under the given key
    #[error("No entry named '{0}' is known.")]
    NameMissing(String),
    /// The scope was already destroyed
    #[error("The scope '{0}' was already destroyed.")]
    ScopeDestroyed(String),

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// Errors while constructing a controller
///
/// These are programming errors - `start()` is aborted and nothing is retried.
#[derive(Error, Debug, Clone)]
pub enum FactoryError {
    /// The constructor of the controller failed
    #[error("Factory for '{product}' failed - error: {error}")]
    ConstructorFailed {
        product: &'static str,
        error: Arc<DynError>,
    },
    /// The created instance does not match its controller class
    #[error("Factory for '{product}' produced an unusable instance - error: {error}")]
    Unbindable {
        product: &'static str,
        error: RequireError,
    },
    /// The scope the controller should be created in is gone
    #[error("Cannot create '{product}' - scope '{scope}' was already destroyed")]
    ScopeDestroyed {
        product: &'static str,
        scope: String,
    },
}

/// Failure of a single dependency during injection
#[derive(Error, Debug, Clone)]
pub enum InjectError {
    /// Could not require the value
    #[error(transparent)]
    RequireError(#[from] RequireError),
    /// The slot was already filled
    #[error("Dependency was already injected")]
    AlreadyInjected,
    /// The injection task could not be handed to the executor
    #[error("Could not spawn injection task: {0}")]
    SpawnFailed(Arc<SpawnError>),
    /// A custom provider failed
    #[error("Error during injection: {0}")]
    Other(Arc<DynError>),
}
impl From<SpawnError> for InjectError {
    fn from(err: SpawnError) -> Self {
        Self::SpawnFailed(Arc::new(err))
    }
}
impl InjectError {
    pub fn other(err: impl Into<DynError>) -> Self {
        Self::Other(Arc::new(err.into()))
    }
}

/// A non-fatal injection failure, collected and reported after startup
#[derive(Error, Debug, Clone)]
#[error("Injecting '{dependency}' into '{controller}' failed: {error}")]
pub struct InjectionFailure {
    pub controller: TypeInfo,
    pub dependency: TypeInfo,
    pub error: InjectError,
}

/// Errors when dispatching a request
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No endpoint is registered for the route
    #[error("No endpoint registered for route '{0}'")]
    RouteNotFound(String),
    /// The endpoint itself failed
    #[error("Endpoint '{route}' failed - error: {error}")]
    Endpoint {
        route: String,
        error: Arc<DynError>,
    },
}

/// Errors when reading request parameters
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Missing positional parameter {0}")]
    MissingPositional(usize),
    #[error("Missing parameter '{0}'")]
    MissingNamed(String),
    #[error("Parameter '{name}' has an unexpected shape: {error}")]
    Invalid {
        name: String,
        error: serde_json::Error,
    },
}

/// The start completion was dropped before every controller finished injection
///
/// Happens if the executor shut down while injection tasks were still queued.
#[derive(Error, Debug, Clone, Copy)]
#[error("Startup was abandoned before all controllers were injected")]
pub struct StartAbandoned;

/// Errors when assembling a [Container](crate::container::Container)
#[derive(Error, Debug, Clone)]
pub enum ContainerBuildError {
    /// Neither an injector nor an executor to build one was supplied
    #[error("No injector configured - supply a spawner or a custom injector")]
    MissingInjector,
}
