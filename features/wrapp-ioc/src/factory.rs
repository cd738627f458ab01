use std::sync::Arc;

use crate::{
    controller::ControllerClass,
    errors::FactoryError,
    scope::{Scope, ScopeState},
    types::Instance,
};

/// Creates controller instances
pub trait ObjectFactory: Send + Sync {
    /// Creates an instance of `class` using `scope` for constructor dependencies
    ///
    /// Returns `None` if the class was intentionally skipped.
    fn create(&self, scope: &Scope, class: &ControllerClass) -> Result<Option<Instance>, FactoryError>;
}

/// Runs the controller's own constructor and publishes the result into the scope
///
/// Publishing right away makes every constructed controller resolvable before injection
/// starts, so controllers may depend on each other in any direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
    fn create(&self, scope: &Scope, class: &ControllerClass) -> Result<Option<Instance>, FactoryError> {
        let product = class.info().type_name;
        if scope.state() == ScopeState::Destroyed {
            return Err(FactoryError::ScopeDestroyed {
                product,
                scope: scope.name().to_string(),
            });
        }

        let instance = class
            .instantiate(scope)
            .map_err(|error| FactoryError::ConstructorFailed {
                product,
                error: Arc::new(error),
            })?;

        match &instance {
            Some(instance) => {
                tracing::debug!("Constructed instance of {product}");
                scope.put_instance(instance.clone());
            }
            None => tracing::debug!("Controller {product} is disabled"),
        }

        Ok(instance)
    }
}
