use std::future::Future;

use crate::{
    errors::InjectError,
    scope::Scope,
    types::{DependencyInfo, TypeInfo},
};

pub mod arc;

/// Describes how a dependency is obtained from a [Scope]
///
/// Implemented for `Arc<T>` (required), `Option<R>` (optional) and [Scope] itself.
pub trait Resolver: Sized + Send + Sync + 'static {
    fn resolve(scope: Scope) -> impl Future<Output = Result<Self, InjectError>> + Send;

    fn dependency_info() -> DependencyInfo;
}

impl Resolver for Scope {
    async fn resolve(scope: Scope) -> Result<Self, InjectError> {
        Ok(scope)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            type_info: TypeInfo::of::<Scope>(),
            optional: false,
        }
    }
}
