//! A small inversion of control runtime
//!
//! A [Container](container::Container) constructs every configured controller, publishes them
//! into a root [Scope](scope::Scope), injects their declared dependencies concurrently on an
//! external executor and afterwards dispatches route based requests to their endpoints.
//!
//! Startup happens in two phases: all controllers are constructed first, only then are
//! dependencies injected. Controllers can therefore depend on each other in any direction.
pub mod configuration;
pub mod container;
pub mod controller;
pub mod endpoint;
pub mod errors;
pub mod factory;
pub mod injector;
pub mod resolver;
pub mod scope;
pub mod types;

pub use configuration::{Configuration, ConfigurationBuilder};
pub use container::{Container, ContainerBuilder, ContainerState, StartReport, StartStatus, CONTAINER_KEY};
pub use controller::{Controller, ControllerClass, Descriptor, Inject};
pub use endpoint::{EndpointRegistry, Params, Request};
pub use errors::{DispatchError, FactoryError, InjectError, InjectionFailure, RequireError};
pub use factory::{DefaultObjectFactory, ObjectFactory};
pub use injector::{AsyncInjector, ObjectInjector};
pub use resolver::Resolver;
pub use scope::Scope;
pub use types::{DynError, Injectable, Instance, TypeInfo};

/// Everything needed to declare controllers and run a container
pub mod prelude {
    pub use crate::{
        configuration::Configuration,
        container::Container,
        controller::{Controller, Descriptor, Inject},
        endpoint::{Params, Request},
        resolver::Resolver,
        scope::Scope,
        types::DynError,
    };
}
