use std::sync::Arc;

use futures::{
    stream::FuturesUnordered,
    task::{Spawn, SpawnExt},
    FutureExt, StreamExt,
};
use parking_lot::Mutex;

use crate::{
    controller::{DependencyBinding, LiveController},
    errors::{InjectError, InjectionFailure},
    scope::Scope,
    types::{Instance, TypeInfo},
};

/// Called once per [ObjectInjector::inject] call, after every dependency settled
pub type InjectionCallback = Box<dyn FnOnce(&Scope, &Instance, Vec<InjectionFailure>) + Send>;

/// Injects the declared dependencies of an already constructed controller
pub trait ObjectInjector: Send + Sync {
    /// Starts injecting `controller` from `scope`
    ///
    /// Must not block on the injection itself. `on_complete` is called exactly once, after all
    /// dependencies were either assigned or failed - failures never stop the other dependencies.
    fn inject(&self, scope: Scope, controller: &LiveController, on_complete: InjectionCallback);
}

/// Resolves all dependencies of a controller concurrently on an external executor
///
/// One task is spawned per controller, driving every dependency of that controller at once.
#[derive(Clone)]
pub struct AsyncInjector {
    spawner: Arc<dyn Spawn + Send + Sync>,
}

impl AsyncInjector {
    pub fn new(spawner: impl Spawn + Send + Sync + 'static) -> Self {
        Self::from_arc(Arc::new(spawner))
    }

    pub fn from_arc(spawner: Arc<dyn Spawn + Send + Sync>) -> Self {
        AsyncInjector { spawner }
    }
}

impl ObjectInjector for AsyncInjector {
    fn inject(&self, scope: Scope, controller: &LiveController, on_complete: InjectionCallback) {
        let info = controller.instance.info;
        let instance = controller.instance.clone();
        let dependencies = controller.dependencies.clone();
        // Shared with the spawn error path below, whoever takes it first calls it
        let on_complete = Arc::new(Mutex::new(Some(on_complete)));

        let task = {
            let on_complete = on_complete.clone();
            let scope = scope.clone();
            async move {
                let failures = inject_all(info, &dependencies, &scope).await;
                let callback = on_complete.lock().take();
                if let Some(callback) = callback {
                    callback(&scope, &instance, failures);
                }
            }
        };

        if let Err(error) = self.spawner.spawn(task) {
            tracing::error!("Could not spawn injection of {info}: {error}");
            let callback = on_complete.lock().take();
            if let Some(callback) = callback {
                let failure = InjectionFailure {
                    controller: info,
                    dependency: info,
                    error: InjectError::from(error),
                };
                callback(&scope, &controller.instance, vec![failure]);
            }
        }
    }
}

/// Drives all dependencies to completion, collecting failures
async fn inject_all(
    controller: TypeInfo,
    dependencies: &[DependencyBinding],
    scope: &Scope,
) -> Vec<InjectionFailure> {
    let mut pending: FuturesUnordered<_> = dependencies
        .iter()
        .map(|dependency| {
            let info = dependency.info;
            dependency
                .inject(scope.clone())
                .map(move |result| (info, result))
        })
        .collect();

    let total = pending.len();
    let mut failures = Vec::new();
    while let Some((info, result)) = pending.next().await {
        if let Err(error) = result {
            tracing::debug!("Injecting {} into {controller} failed: {error}", info.type_info);
            failures.push(InjectionFailure {
                controller,
                dependency: info.type_info,
                error,
            });
        }
    }

    tracing::debug!(
        "Injected {controller} [{} of {total} dependencies failed]",
        failures.len()
    );
    failures
}

#[cfg(test)]
mod tests {
    use futures::{
        executor::{block_on, ThreadPool},
        future::{self, FutureObj},
        task::SpawnError,
    };
    use futures_channel::oneshot;

    use super::*;
    use crate::{
        controller::{Controller, ControllerClass, Descriptor, Inject},
        errors::RequireError,
        types::DynError,
    };

    struct Report {
        present: Inject<Arc<String>>,
        absent: Inject<Arc<u32>>,
        loaded: Inject<Vec<u8>>,
    }

    impl Controller for Report {
        fn construct(_scope: &Scope) -> Result<Self, DynError> {
            Ok(Report {
                present: Inject::new(),
                absent: Inject::new(),
                loaded: Inject::new(),
            })
        }

        fn describe(descriptor: &mut Descriptor<Self>) {
            descriptor
                .inject(|report| &report.present)
                .inject(|report| &report.absent)
                .inject_with(
                    |report| &report.loaded,
                    |_scope| async {
                        future::ready(()).await;
                        Ok::<_, DynError>(vec![1, 2, 3])
                    },
                );
        }
    }

    fn live_report(scope: &Scope) -> LiveController {
        let class = ControllerClass::of::<Report>();
        let instance = class.instantiate(scope).unwrap().unwrap();
        class.bind(&instance).unwrap().controller
    }

    #[test]
    fn failures_do_not_stop_siblings() {
        let scope = Scope::root("root");
        scope.put("hello".to_string());
        let controller = live_report(&scope);

        let (tx, rx) = oneshot::channel();
        AsyncInjector::new(ThreadPool::new().unwrap()).inject(
            scope,
            &controller,
            Box::new(move |_, instance, failures| {
                let _ = tx.send((instance.clone(), failures));
            }),
        );

        let (instance, failures) = block_on(rx).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0].error,
            InjectError::RequireError(RequireError::TypeMissing(_))
        ));
        assert_eq!(failures[0].dependency, TypeInfo::of::<u32>());

        let report = instance.downcast::<Report>().unwrap();
        assert_eq!(report.present.get().unwrap().as_str(), "hello");
        assert_eq!(report.loaded.get().unwrap(), &[1, 2, 3]);
        assert!(!report.absent.is_injected());
    }

    struct RejectingSpawner;
    impl Spawn for RejectingSpawner {
        fn spawn_obj(&self, _future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
            Err(SpawnError::shutdown())
        }
    }

    #[test]
    fn spawn_failure_still_completes() {
        let scope = Scope::root("root");
        let controller = live_report(&scope);

        let (tx, rx) = oneshot::channel();
        AsyncInjector::new(RejectingSpawner).inject(
            scope,
            &controller,
            Box::new(move |_, _, failures| {
                let _ = tx.send(failures);
            }),
        );

        let failures = block_on(rx).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, InjectError::SpawnFailed(_)));
    }
}
