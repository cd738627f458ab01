use crate::{
    controller::{Controller, ControllerClass},
    scope::Scope,
};

/// What a container starts: the controller classes in order and the root scope
#[derive(Debug, Clone)]
pub struct Configuration {
    controllers: Vec<ControllerClass>,
    root_scope: Scope,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn controllers(&self) -> &[ControllerClass] {
        &self.controllers
    }

    pub fn root_scope(&self) -> &Scope {
        &self.root_scope
    }
}

#[derive(Default)]
pub struct ConfigurationBuilder {
    controllers: Vec<ControllerClass>,
    root_scope: Option<Scope>,
}

impl ConfigurationBuilder {
    /// Adds a controller type
    pub fn controller<C: Controller>(self) -> Self {
        self.controller_class(ControllerClass::of::<C>())
    }

    pub fn controller_class(mut self, class: ControllerClass) -> Self {
        self.controllers.push(class);
        self
    }

    /// Uses an existing scope as root, by default a new root scope named "root" is created
    pub fn root_scope(mut self, scope: Scope) -> Self {
        self.root_scope = Some(scope);
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            controllers: self.controllers,
            root_scope: self.root_scope.unwrap_or_else(|| Scope::root("root")),
        }
    }
}
