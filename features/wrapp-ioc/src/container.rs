use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    task::{Context, Poll},
};

use futures::{task::Spawn, FutureExt};
use futures_channel::oneshot;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    configuration::Configuration,
    controller::{BoundController, ControllerClass, LiveController},
    endpoint::{EndpointRegistry, Request},
    errors::{ContainerBuildError, DispatchError, FactoryError, InjectionFailure, StartAbandoned},
    factory::{DefaultObjectFactory, ObjectFactory},
    injector::{AsyncInjector, ObjectInjector},
    scope::Scope,
    types::Instance,
};

/// Key the running container is published under in its root scope
pub const CONTAINER_KEY: &str = "$container";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Idle,
    /// Controllers are being constructed
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    /// `start` was already called, nothing happened
    AlreadyStarted,
}

/// Called once all controllers finished injection, with every failure that happened
pub type StartCallback = Box<dyn FnOnce(&Container, Vec<InjectionFailure>) + Send>;

/// Constructs controllers, injects them and dispatches requests to their endpoints
///
/// Cloning a container clones the handle.
#[derive(Clone)]
pub struct Container(Arc<ContainerInner>);
struct ContainerInner {
    configuration: Configuration,
    factory: Arc<dyn ObjectFactory>,
    injector: Arc<dyn ObjectInjector>,
    state: Mutex<ContainerState>,
    /// Written once by `start`, read only afterwards
    registry: OnceLock<EndpointRegistry>,
    controllers: OnceLock<Vec<LiveController>>,
}
impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("state", &self.state())
            .field("root_scope", self.root_scope())
            .field("controllers", &self.controllers().len())
            .field("routes", &self.0.registry.get().map(EndpointRegistry::routes))
            .finish()
    }
}

impl Container {
    /// Container with the default factory, injecting on `spawner`
    pub fn new(configuration: Configuration, spawner: impl Spawn + Send + Sync + 'static) -> Self {
        Container::with_parts(
            configuration,
            Arc::new(DefaultObjectFactory),
            Arc::new(AsyncInjector::new(spawner)),
        )
    }

    pub fn builder(configuration: Configuration) -> ContainerBuilder {
        ContainerBuilder {
            configuration,
            factory: None,
            injector: None,
        }
    }

    fn with_parts(
        configuration: Configuration,
        factory: Arc<dyn ObjectFactory>,
        injector: Arc<dyn ObjectInjector>,
    ) -> Self {
        Container(Arc::new(ContainerInner {
            configuration,
            factory,
            injector,
            state: Mutex::new(ContainerState::Idle),
            registry: OnceLock::new(),
            controllers: OnceLock::new(),
        }))
    }

    /// The container published in `scope` or one of its parents
    pub fn from_scope(scope: &Scope) -> Option<Container> {
        scope
            .get_named::<Container>(CONTAINER_KEY)
            .map(|container| container.as_ref().clone())
    }

    pub fn state(&self) -> ContainerState {
        *self.0.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContainerState::Running
    }

    pub fn root_scope(&self) -> &Scope {
        self.0.configuration.root_scope()
    }

    /// The live controllers, empty until started
    pub fn controllers(&self) -> &[LiveController] {
        self.0.controllers.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// The endpoint registry, `None` until started
    pub fn endpoints(&self) -> Option<&EndpointRegistry> {
        self.0.registry.get()
    }
}

// Startup
impl Container {
    /// Constructs all controllers and starts injecting them
    ///
    /// Construction happens synchronously, injection does not: `on_start_complete` is called
    /// once every controller finished injection, with the failures of all of them. A container
    /// with failed injections still runs, so callers should check the failures.
    ///
    /// Calling `start` on a started container does nothing. A failing constructor aborts the
    /// start, removes the controllers constructed so far from the root scope and resets the
    /// container to idle.
    pub fn start<F>(&self, on_start_complete: F) -> Result<StartStatus, FactoryError>
    where
        F: FnOnce(&Container, Vec<InjectionFailure>) + Send + 'static,
    {
        {
            let mut state = self.0.state.lock();
            if *state != ContainerState::Idle {
                tracing::warn!("Container is already {:?} - ignoring start", *state);
                return Ok(StartStatus::AlreadyStarted);
            }
            *state = ContainerState::Starting;
        }

        let bound = match self.create_controllers() {
            Ok(bound) => bound,
            Err(error) => {
                tracing::error!("Starting container failed: {error}");
                *self.0.state.lock() = ContainerState::Idle;
                return Err(error);
            }
        };

        let mut registry = EndpointRegistry::new();
        let mut controllers = Vec::with_capacity(bound.len());
        for BoundController {
            controller,
            endpoints,
        } in bound
        {
            for endpoint in endpoints {
                registry.register(endpoint);
            }
            controllers.push(controller);
        }
        tracing::debug!(
            "Registered {} routes of {} controllers",
            registry.len(),
            controllers.len()
        );

        // Only reachable once, the state guard keeps every other call out
        let _ = self.0.registry.set(registry);
        let _ = self.0.controllers.set(controllers);

        self.root_scope().put_named(CONTAINER_KEY, self.clone());
        *self.0.state.lock() = ContainerState::Running;

        self.inject_controllers(Box::new(on_start_complete));
        Ok(StartStatus::Started)
    }

    /// Like [Container::start] but returns a future for the completion
    ///
    /// Returns `None` if the container was already started.
    pub fn start_async(&self) -> Result<Option<Started>, FactoryError> {
        let (tx, rx) = oneshot::channel();
        let status = self.start(move |_, failures| {
            let _ = tx.send(StartReport { failures });
        })?;

        Ok(match status {
            StartStatus::Started => Some(Started { rx }),
            StartStatus::AlreadyStarted => None,
        })
    }

    fn create_controllers(&self) -> Result<Vec<BoundController>, FactoryError> {
        let root = self.root_scope();
        let classes = self.0.configuration.controllers();
        tracing::debug!("Creating {} controllers in scope '{}'", classes.len(), root.name());

        // All controllers exist before any of them gets injected
        let mut instances = Vec::with_capacity(classes.len());
        for class in classes {
            match self.0.factory.create(root, class) {
                Ok(Some(instance)) => instances.push((class, instance)),
                Ok(None) => {}
                Err(error) => {
                    Self::unpublish(root, &instances);
                    return Err(error);
                }
            }
        }

        let bound: Result<Vec<BoundController>, FactoryError> = instances
            .iter()
            .map(|(class, instance)| {
                class
                    .bind(instance)
                    .map_err(|error| FactoryError::Unbindable {
                        product: class.info().type_name,
                        error,
                    })
            })
            .collect();
        if bound.is_err() {
            Self::unpublish(root, &instances);
        }
        bound
    }

    /// Removes controllers of an aborted start from the scope they were published in
    fn unpublish(root: &Scope, instances: &[(&ControllerClass, Instance)]) {
        let removed = instances
            .iter()
            .filter(|(_, instance)| root.remove_instance(instance))
            .count();
        tracing::debug!("Removed {removed} controllers of the aborted start from '{}'", root.name());
    }

    fn inject_controllers(&self, on_start_complete: StartCallback) {
        let controllers = self.controllers();
        let completion = Arc::new(StartCompletion {
            container: self.clone(),
            total: controllers.len(),
            completed: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            on_complete: Mutex::new(Some(on_start_complete)),
        });

        if controllers.is_empty() {
            completion.finish();
            return;
        }

        for controller in controllers {
            let completion = completion.clone();
            self.0.injector.inject(
                self.root_scope().clone(),
                controller,
                Box::new(move |_, _, failures| completion.controller_done(failures)),
            );
        }
    }
}

/// Shared between the injection callbacks of one `start` call
struct StartCompletion {
    container: Container,
    total: usize,
    completed: AtomicUsize,
    failures: Mutex<Vec<InjectionFailure>>,
    on_complete: Mutex<Option<StartCallback>>,
}

impl StartCompletion {
    fn controller_done(&self, failures: Vec<InjectionFailure>) {
        self.failures.lock().extend(failures);
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            "Waiting for controllers to finish injection [{completed} of {} complete]",
            self.total
        );

        if completed == self.total {
            self.finish();
        }
    }

    fn finish(&self) {
        let Some(callback) = self.on_complete.lock().take() else {
            return;
        };
        let failures = std::mem::take(&mut *self.failures.lock());
        tracing::debug!(
            "All controllers injected - {} injection failures",
            failures.len()
        );
        callback(&self.container, failures);
    }
}

/// Outcome of the injection phase
#[derive(Debug, Clone)]
pub struct StartReport {
    pub failures: Vec<InjectionFailure>,
}
impl StartReport {
    /// True if every dependency got injected
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves once every controller finished injection
#[derive(Debug)]
pub struct Started {
    rx: oneshot::Receiver<StartReport>,
}
impl Future for Started {
    type Output = Result<StartReport, StartAbandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|result| result.map_err(|_| StartAbandoned))
    }
}

// Dispatch
impl Container {
    /// Calls the endpoint registered for the request's route
    pub fn invoke(&self, scope: &Scope, request: &Request) -> Result<Value, DispatchError> {
        let endpoint = self
            .0
            .registry
            .get()
            .and_then(|registry| registry.get(&request.route))
            .ok_or_else(|| DispatchError::RouteNotFound(request.route.clone()))?;

        tracing::trace!("Dispatching '{}' to {endpoint}", request.route);
        endpoint
            .invoke(scope, &request.params)
            .map_err(|error| DispatchError::Endpoint {
                route: request.route.clone(),
                error: Arc::new(error),
            })
    }
}

pub struct ContainerBuilder {
    configuration: Configuration,
    factory: Option<Arc<dyn ObjectFactory>>,
    injector: Option<Arc<dyn ObjectInjector>>,
}

impl ContainerBuilder {
    /// Replaces the [DefaultObjectFactory]
    pub fn factory(mut self, factory: impl ObjectFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn injector(mut self, injector: impl ObjectInjector + 'static) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    /// Injects with an [AsyncInjector] on `spawner`
    pub fn spawner(self, spawner: impl Spawn + Send + Sync + 'static) -> Self {
        self.injector(AsyncInjector::new(spawner))
    }

    pub fn build(self) -> Result<Container, ContainerBuildError> {
        let injector = self.injector.ok_or(ContainerBuildError::MissingInjector)?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultObjectFactory));

        Ok(Container::with_parts(self.configuration, factory, injector))
    }
}
