//! Declaring controllers
//!
//! A controller is constructed once by the container and exports route mapped operations.
//! Instead of reflecting over the type, a controller describes itself through a
//! [Descriptor]: which routes it serves and which of its [Inject] slots get filled from
//! the scope once every controller exists.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use wrapp_ioc::prelude::*;
//!
//! struct Greeter {
//!     greeting: Inject<Arc<String>>,
//! }
//!
//! impl Controller for Greeter {
//!     fn construct(_scope: &Scope) -> Result<Self, DynError> {
//!         Ok(Greeter { greeting: Inject::new() })
//!     }
//!
//!     fn describe(descriptor: &mut Descriptor<Self>) {
//!         descriptor
//!             .inject(|greeter| &greeter.greeting)
//!             .route("greet", "greet", |greeter, _scope, params| {
//!                 let name: String = params.get("name")?;
//!                 let greeting = greeter.greeting.get().ok_or("not injected")?;
//!                 Ok(format!("{greeting} {name}"))
//!             });
//!     }
//! }
//! ```
use std::{fmt::Debug, future::Future, sync::Arc, sync::OnceLock};

use futures::{future::BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;

use crate::{
    endpoint::{ControllerEndpoint, EndpointHandler, Params},
    errors::{InjectError, RequireError},
    resolver::Resolver,
    scope::Scope,
    types::{DependencyInfo, DynError, Injectable, Instance, TypeInfo},
};

/// A component managed by the container
pub trait Controller: Injectable + Sized {
    /// Constructs the controller
    ///
    /// Only values already present in the scope are available here, everything else must be
    /// declared as a dependency in [Controller::describe].
    fn construct(scope: &Scope) -> Result<Self, DynError>;

    /// Returns false to skip the controller entirely
    fn is_enabled(scope: &Scope) -> bool {
        let _ = scope;
        true
    }

    /// Declares routes and dependencies, evaluated once per instance during startup
    fn describe(descriptor: &mut Descriptor<Self>);
}

/// Slot a dependency is injected into
///
/// Filled at most once, by the injector.
pub struct Inject<T>(OnceLock<T>);
impl<T> Inject<T> {
    pub const fn new() -> Self {
        Inject(OnceLock::new())
    }

    pub fn get(&self) -> Option<&T> {
        self.0.get()
    }

    pub fn is_injected(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn set(&self, value: T) -> Result<(), InjectError> {
        self.0.set(value).map_err(|_| InjectError::AlreadyInjected)
    }
}
impl<T> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T: Debug> Debug for Inject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.get() {
            Some(value) => f.debug_tuple("Inject").field(value).finish(),
            None => f.debug_tuple("Inject").field(&"<pending>").finish(),
        }
    }
}

type Handler<C> = Arc<dyn Fn(&C, &Scope, &Params) -> Result<Value, DynError> + Send + Sync>;
type InjectTask<C> =
    Arc<dyn Fn(Arc<C>, Scope) -> BoxFuture<'static, Result<(), InjectError>> + Send + Sync>;

struct Operation<C> {
    route: String,
    method: &'static str,
    handler: Handler<C>,
}

struct Dependency<C> {
    info: DependencyInfo,
    task: InjectTask<C>,
}

/// Routes and dependencies of a controller type
pub struct Descriptor<C> {
    operations: Vec<Operation<C>>,
    dependencies: Vec<Dependency<C>>,
}

impl<C: Controller> Descriptor<C> {
    fn new() -> Self {
        Descriptor {
            operations: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Exports `method` under `route`
    pub fn route<F, R>(&mut self, route: impl Into<String>, method: &'static str, handler: F) -> &mut Self
    where
        F: Fn(&C, &Scope, &Params) -> Result<R, DynError> + Send + Sync + 'static,
        R: Serialize,
    {
        let handler: Handler<C> = Arc::new(
            move |controller: &C, scope: &Scope, params: &Params| -> Result<Value, DynError> {
                let reply = handler(controller, scope, params)?;
                Ok(serde_json::to_value(reply)?)
            },
        );

        self.operations.push(Operation {
            route: route.into(),
            method,
            handler,
        });
        self
    }

    /// Fills the slot with whatever `R` resolves to in the scope
    pub fn inject<R: Resolver>(&mut self, slot: fn(&C) -> &Inject<R>) -> &mut Self {
        let task: InjectTask<C> = Arc::new(move |controller: Arc<C>, scope: Scope| {
            async move {
                let value = R::resolve(scope).await?;
                slot(&*controller).set(value)
            }
            .boxed()
        });

        self.dependencies.push(Dependency {
            info: R::dependency_info(),
            task,
        });
        self
    }

    /// Fills the slot with the value stored under `key`
    pub fn inject_named<T: Injectable>(
        &mut self,
        key: &'static str,
        slot: fn(&C) -> &Inject<Arc<T>>,
    ) -> &mut Self {
        let task: InjectTask<C> = Arc::new(move |controller: Arc<C>, scope: Scope| {
            async move {
                let value = scope.require_named::<T>(key)?;
                slot(&*controller).set(value)
            }
            .boxed()
        });

        self.dependencies.push(Dependency {
            info: DependencyInfo {
                type_info: TypeInfo::of::<T>(),
                optional: false,
            },
            task,
        });
        self
    }

    /// Fills the slot with the output of an async provider
    ///
    /// For dependencies which need out of band work, like loading a resource.
    pub fn inject_with<T, F, Fut>(&mut self, slot: fn(&C) -> &Inject<T>, provider: F) -> &mut Self
    where
        T: Injectable,
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DynError>> + Send + 'static,
    {
        let provider = Arc::new(provider);
        let task: InjectTask<C> = Arc::new(move |controller: Arc<C>, scope: Scope| {
            let provider = provider.clone();
            async move {
                let value = provider(scope).await.map_err(InjectError::other)?;
                slot(&*controller).set(value)
            }
            .boxed()
        });

        self.dependencies.push(Dependency {
            info: DependencyInfo {
                type_info: TypeInfo::of::<T>(),
                optional: false,
            },
            task,
        });
        self
    }
}

/// One dependency of a live controller, ready to be resolved
#[derive(Clone)]
pub struct DependencyBinding {
    pub info: DependencyInfo,
    inject: Arc<dyn Fn(Scope) -> BoxFuture<'static, Result<(), InjectError>> + Send + Sync>,
}
impl Debug for DependencyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBinding")
            .field("type", &self.info.type_info.type_name)
            .field("optional", &self.info.optional)
            .finish()
    }
}
impl DependencyBinding {
    /// Resolves the dependency from `scope` and assigns it
    pub fn inject(&self, scope: Scope) -> BoxFuture<'static, Result<(), InjectError>> {
        (self.inject)(scope)
    }
}

/// A constructed controller together with its declared dependencies
#[derive(Clone, Debug)]
pub struct LiveController {
    pub instance: Instance,
    pub dependencies: Vec<DependencyBinding>,
}

/// A live controller and the endpoints it exports
pub struct BoundController {
    pub controller: LiveController,
    pub endpoints: Vec<ControllerEndpoint>,
}

/// Type erased controller type, the unit a configuration lists
#[derive(Clone, Copy)]
pub struct ControllerClass {
    info: TypeInfo,
    instantiate: fn(&Scope) -> Result<Option<Instance>, DynError>,
    bind: fn(&Instance) -> Result<BoundController, RequireError>,
}
impl Debug for ControllerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ControllerClass").field(&self.info.type_name).finish()
    }
}

impl ControllerClass {
    pub fn of<C: Controller>() -> ControllerClass {
        ControllerClass {
            info: TypeInfo::of::<C>(),
            instantiate: instantiate::<C>,
            bind: bind::<C>,
        }
    }

    pub fn info(&self) -> TypeInfo {
        self.info
    }

    /// Constructs an instance, `None` if the controller is disabled
    pub fn instantiate(&self, scope: &Scope) -> Result<Option<Instance>, DynError> {
        (self.instantiate)(scope)
    }

    /// Evaluates the descriptor against a constructed instance
    pub fn bind(&self, instance: &Instance) -> Result<BoundController, RequireError> {
        (self.bind)(instance)
    }
}

fn instantiate<C: Controller>(scope: &Scope) -> Result<Option<Instance>, DynError> {
    if !C::is_enabled(scope) {
        return Ok(None);
    }
    C::construct(scope).map(|controller| Some(Instance::new(controller)))
}

fn bind<C: Controller>(instance: &Instance) -> Result<BoundController, RequireError> {
    let controller: Arc<C> =
        instance
            .downcast()
            .map_err(|actual_type| RequireError::DowncastFailed {
                required_type: std::any::type_name::<C>(),
                actual_type,
            })?;

    let mut descriptor = Descriptor::<C>::new();
    C::describe(&mut descriptor);

    let endpoints = descriptor
        .operations
        .into_iter()
        .map(|operation| {
            let controller = controller.clone();
            let handler = operation.handler;
            let bound: EndpointHandler = Arc::new(move |scope: &Scope, params: &Params| {
                handler(&*controller, scope, params)
            });
            ControllerEndpoint::new(operation.route, operation.method, instance.clone(), bound)
        })
        .collect();

    let dependencies = descriptor
        .dependencies
        .into_iter()
        .map(|dependency| {
            let controller = controller.clone();
            let task = dependency.task;
            DependencyBinding {
                info: dependency.info,
                inject: Arc::new(move |scope: Scope| task(controller.clone(), scope)),
            }
        })
        .collect();

    Ok(BoundController {
        controller: LiveController {
            instance: instance.clone(),
            dependencies,
        },
        endpoints,
    })
}
