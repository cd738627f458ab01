use std::{any::type_name, ops::Deref, sync::Arc};

use wrapp_ioc::{
    errors::{InjectError, RequireError},
    resolver::Resolver,
    scope::Scope,
    types::{DependencyInfo, TypeInfo},
};

use crate::provider::ConfigProvider;

/// A wrapper type to allow for config injections
///
/// Resolves the [ConfigProvider] published in the scope and takes the config of type `T` from
/// it, so a controller can declare a config as a dependency.
///
/// # Example
/// ```rust
/// use wrapp_config::{config::Config, provider::ConfigProvider};
/// use wrapp_ioc::prelude::*;
///
/// pub struct ModuleConfig {
///     enabled: bool,
/// }
///
/// struct Module {
///     config: Inject<Config<ModuleConfig>>,
/// }
///
/// impl Controller for Module {
///     fn construct(_scope: &Scope) -> Result<Self, DynError> {
///         Ok(Module { config: Inject::new() })
///     }
///
///     fn describe(descriptor: &mut Descriptor<Self>) {
///         descriptor.inject(|module| &module.config);
///     }
/// }
///
/// let mut provider = ConfigProvider::new();
/// provider.add_config(ModuleConfig { enabled: true }).unwrap();
///
/// let configuration = Configuration::builder().controller::<Module>().build();
/// provider.publish(configuration.root_scope());
/// ```
pub struct Config<T> {
    inner: Arc<T>,
}
impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T> Config<T> {
    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Config").field(&self.inner).finish()
    }
}

impl<T: Send + Sync + 'static> Resolver for Config<T> {
    async fn resolve(scope: Scope) -> Result<Self, InjectError> {
        let config_name = type_name::<T>();
        let config_provider = scope.require::<ConfigProvider>()?;

        let config: Arc<T> = config_provider
            .get_config()
            .map_err(InjectError::other)?
            .ok_or(InjectError::RequireError(RequireError::TypeMissing(config_name)))?;

        Ok(Config { inner: config })
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            type_info: TypeInfo::of::<Config<T>>(),
            optional: false,
        }
    }
}
