use std::sync::Arc;

use futures::executor::{block_on, ThreadPool};
use tracing_subscriber::EnvFilter;
use wrapp_ioc::prelude::*;

fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let configuration = Configuration::builder()
        .controller::<Greeter>()
        .controller::<Counter>()
        .build();
    configuration.root_scope().put("Hello".to_string());

    let container = Container::new(configuration, ThreadPool::new()?);
    if let Some(started) = container.start_async()? {
        let report = block_on(started)?;
        for failure in &report.failures {
            tracing::warn!("{failure}");
        }
    }

    let request_scope = container.root_scope().create_child("request");

    let greeting = container.invoke(&request_scope, &Request::new("greet").param("name", "wrapp"))?;
    let count = container.invoke(&request_scope, &Request::new("count"))?;
    println!("{greeting} - greeted {count} times");

    request_scope.on_destroy();
    Ok(())
}

struct Greeter {
    greeting: Inject<Arc<String>>,
    counter: Inject<Arc<Counter>>,
}

impl Controller for Greeter {
    fn construct(_scope: &Scope) -> Result<Self, DynError> {
        Ok(Greeter {
            greeting: Inject::new(),
            counter: Inject::new(),
        })
    }

    fn describe(descriptor: &mut Descriptor<Self>) {
        descriptor
            .inject(|greeter| &greeter.greeting)
            .inject(|greeter| &greeter.counter)
            .route("greet", "greet", |greeter, _scope, params| {
                let name: String = params.get("name")?;
                let greeting = greeter.greeting.get().ok_or("greeting not injected")?;
                if let Some(counter) = greeter.counter.get() {
                    counter.increment();
                }
                Ok(format!("{greeting}, {name}!"))
            });
    }
}

#[derive(Default)]
struct Counter {
    count: std::sync::atomic::AtomicUsize,
}

impl Counter {
    fn increment(&self) {
        self.count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Controller for Counter {
    fn construct(_scope: &Scope) -> Result<Self, DynError> {
        Ok(Counter::default())
    }

    fn describe(descriptor: &mut Descriptor<Self>) {
        descriptor.route("count", "count", |counter, _scope, _params| {
            Ok(counter.count.load(std::sync::atomic::Ordering::Relaxed))
        });
    }
}
