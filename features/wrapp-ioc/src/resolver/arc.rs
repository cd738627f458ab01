use std::sync::Arc;

use crate::{
    errors::{InjectError, RequireError},
    resolver::Resolver,
    scope::Scope,
    types::{DependencyInfo, Injectable, TypeInfo},
};

impl<T: Injectable> Resolver for Arc<T> {
    async fn resolve(scope: Scope) -> Result<Self, InjectError> {
        Ok(scope.require::<T>()?)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            type_info: TypeInfo::of::<T>(),
            optional: false,
        }
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    async fn resolve(scope: Scope) -> Result<Self, InjectError> {
        match Resolvable::resolve(scope).await {
            Ok(resolved) => Ok(Some(resolved)),
            Err(e) => match e {
                // A missing value is fine for an optional dependency
                InjectError::RequireError(RequireError::TypeMissing(_))
                | InjectError::RequireError(RequireError::NameMissing(_)) => Ok(None),
                _ => Err(e),
            },
        }
    }

    fn dependency_info() -> DependencyInfo {
        let original = Resolvable::dependency_info();
        DependencyInfo {
            optional: true,
            ..original
        }
    }
}
