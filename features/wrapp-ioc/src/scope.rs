//! Hierarchical value stores
//!
//! A [Scope] holds typed and named values, delegates lookups to its parent and notifies
//! registered callbacks once it is destroyed. Parents own their children, children only
//! keep a weak link to their parent.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::Debug,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    errors::RequireError,
    types::{Injectable, Instance, TypeInfo},
};

/// Invoked once when the scope it is registered on gets destroyed
pub type DestroyCallback = Arc<dyn Fn(&Scope) + Send + Sync>;

/// Wraps a closure into a [DestroyCallback]
///
/// Keep the returned handle around if the callback should be removable later.
pub fn destroy_callback(callback: impl Fn(&Scope) + Send + Sync + 'static) -> DestroyCallback {
    Arc::new(callback)
}

/// Key of a value stored in a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Type(TypeInfo),
    Name(String),
}
impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKey::Type(info) => write!(f, "<{info}>"),
            EntryKey::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Constructed, `on_create` not yet called
    Created,
    Active,
    /// Destroy callbacks are running
    Destroying,
    Destroyed,
}

/// A node in the scope tree
///
/// Cloning a scope clones the handle, not the node.
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

struct ScopeInner {
    id: u64,
    name: String,
    parent: Option<Weak<ScopeInner>>,
    lifecycle: Mutex<Lifecycle>,
    entries: RwLock<HashMap<EntryKey, Entry>>,
    /// Insertion order of entries, breaks ties when several entries match a type
    sequence: AtomicU64,
}

struct Entry {
    sequence: u64,
    instance: Instance,
}

struct Lifecycle {
    state: ScopeState,
    callbacks: Vec<DestroyCallback>,
    children: Vec<Scope>,
}

impl Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Scope {
    /// Creates a new scope without a parent
    pub fn root(name: impl Into<String>) -> Scope {
        let scope = Scope::new(name.into(), None);
        scope.on_create();
        scope
    }

    /// Creates a child of this scope
    ///
    /// The child is owned by this scope and destroyed together with it. Children created on a
    /// scope which is already being destroyed are not adopted.
    pub fn create_child(&self, name: impl Into<String>) -> Scope {
        let child = Scope::new(name.into(), Some(Arc::downgrade(&self.0)));
        child.on_create();

        let mut lifecycle = self.0.lifecycle.lock();
        if lifecycle.state == ScopeState::Active {
            lifecycle.children.push(child.clone());
        } else {
            tracing::debug!(
                "Scope '{}' is {:?}, not adopting child '{}'",
                self.0.name,
                lifecycle.state,
                child.0.name
            );
        }
        child
    }

    fn new(name: String, parent: Option<Weak<ScopeInner>>) -> Scope {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Scope(Arc::new(ScopeInner {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            name,
            parent,
            lifecycle: Mutex::new(Lifecycle {
                state: ScopeState::Created,
                callbacks: Vec::new(),
                children: Vec::new(),
            }),
            entries: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.as_ref()?.upgrade().map(Scope)
    }

    pub fn state(&self) -> ScopeState {
        self.0.lifecycle.lock().state
    }

    pub fn is_valid(&self) -> bool {
        self.state() == ScopeState::Active
    }

    /// Two handles are equal if they point at the same node
    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// Values
impl Scope {
    /// Stores a value under its type
    ///
    /// Returns the previously stored value of the same type.
    pub fn put<T: Injectable>(&self, value: T) -> Option<Instance> {
        self.put_instance(Instance::new(value))
    }

    pub fn put_arc<T: Injectable>(&self, value: Arc<T>) -> Option<Instance> {
        self.put_instance(Instance::from_arc(value))
    }

    pub fn put_instance(&self, instance: Instance) -> Option<Instance> {
        self.insert(EntryKey::Type(instance.info), instance)
    }

    /// Stores a value under a name
    pub fn put_named<T: Injectable>(&self, key: impl Into<String>, value: T) -> Option<Instance> {
        self.insert(EntryKey::Name(key.into()), Instance::new(value))
    }

    pub fn put_named_instance(&self, key: impl Into<String>, instance: Instance) -> Option<Instance> {
        self.insert(EntryKey::Name(key.into()), instance)
    }

    fn insert(&self, key: EntryKey, instance: Instance) -> Option<Instance> {
        let lifecycle = self.0.lifecycle.lock();
        if lifecycle.state == ScopeState::Destroyed {
            tracing::debug!("Ignoring '{key}' - scope '{}' is destroyed", self.0.name);
            return None;
        }

        tracing::trace!("Scope '{}' stores '{key}'", self.0.name);
        let entry = Entry {
            sequence: self.0.sequence.fetch_add(1, Ordering::Relaxed),
            instance,
        };
        self.0
            .entries
            .write()
            .insert(key, entry)
            .map(|replaced| replaced.instance)
    }

    /// Removes `instance` from its typed slot
    ///
    /// Only removes the entry if it still holds this exact instance. Returns true if it did.
    pub fn remove_instance(&self, instance: &Instance) -> bool {
        let mut entries = self.0.entries.write();
        let key = EntryKey::Type(instance.info);
        let holds = entries
            .get(&key)
            .is_some_and(|entry| entry.instance.ptr_eq(instance));
        if holds {
            entries.remove(&key);
            tracing::trace!("Scope '{}' removed '{key}'", self.0.name);
        }
        holds
    }

    /// Resolves a value assignable to `T` from this scope or its parents
    ///
    /// Resolving [Scope] returns the scope itself. Destroyed scopes resolve nothing.
    pub fn resolve<T: Injectable>(&self) -> Option<Arc<T>> {
        if TypeId::of::<T>() == TypeId::of::<Scope>() {
            if self.state() == ScopeState::Destroyed {
                return None;
            }
            let this: Arc<dyn Any + Send + Sync> = Arc::new(self.clone());
            return this.downcast::<T>().ok();
        }

        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.state() == ScopeState::Destroyed {
                return None;
            }
            if let Some(found) = scope.resolve_local::<T>() {
                return Some(found);
            }
            current = scope.parent();
        }

        tracing::trace!("'{}' not found from scope '{}'", std::any::type_name::<T>(), self.0.name);
        None
    }

    /// Like [Scope::resolve] but returns an error describing what is missing
    pub fn require<T: Injectable>(&self) -> Result<Arc<T>, RequireError> {
        if self.state() == ScopeState::Destroyed {
            return Err(RequireError::ScopeDestroyed(self.0.name.clone()));
        }
        self.resolve::<T>()
            .ok_or(RequireError::TypeMissing(std::any::type_name::<T>()))
    }

    fn resolve_local<T: Injectable>(&self) -> Option<Arc<T>> {
        let entries = self.0.entries.read();
        if let Some(Ok(found)) = entries
            .get(&EntryKey::Type(TypeInfo::of::<T>()))
            .map(|entry| entry.instance.downcast::<T>())
        {
            return Some(found);
        }

        // Named or differently keyed entries, the earliest stored one wins
        entries
            .values()
            .filter_map(|entry| {
                let found = entry.instance.downcast::<T>().ok()?;
                Some((entry.sequence, found))
            })
            .min_by_key(|(sequence, _)| *sequence)
            .map(|(_, found)| found)
    }

    /// Resolves a named value from this scope or its parents
    pub fn resolve_named(&self, key: &str) -> Option<Instance> {
        let key = EntryKey::Name(key.to_string());
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.state() == ScopeState::Destroyed {
                return None;
            }
            if let Some(found) = scope.0.entries.read().get(&key) {
                return Some(found.instance.clone());
            }
            current = scope.parent();
        }
        None
    }

    pub fn get_named<T: Injectable>(&self, key: &str) -> Option<Arc<T>> {
        self.resolve_named(key)?.downcast().ok()
    }

    pub fn require_named<T: Injectable>(&self, key: &str) -> Result<Arc<T>, RequireError> {
        let instance = self
            .resolve_named(key)
            .ok_or_else(|| RequireError::NameMissing(key.to_string()))?;

        instance
            .downcast()
            .map_err(|actual_type| RequireError::DowncastFailed {
                required_type: std::any::type_name::<T>(),
                actual_type,
            })
    }

    /// Visits the entries stored directly in this scope, in insertion order
    ///
    /// Works on a snapshot, so the visitor may modify the scope.
    pub fn for_each_entry<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&EntryKey, &Instance) -> ControlFlow<()>,
    {
        let mut snapshot: Vec<(u64, EntryKey, Instance)> = self
            .0
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (entry.sequence, key.clone(), entry.instance.clone()))
            .collect();
        snapshot.sort_unstable_by_key(|(sequence, _, _)| *sequence);

        for (_, key, instance) in &snapshot {
            visitor(key, instance)?;
        }
        ControlFlow::Continue(())
    }

    /// Visits the direct children of this scope
    pub fn for_each_scope<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&Scope) -> ControlFlow<()>,
    {
        let snapshot = self.0.lifecycle.lock().children.clone();
        for child in &snapshot {
            visitor(child)?;
        }
        ControlFlow::Continue(())
    }
}

// Lifecycle
impl Scope {
    /// Marks the scope as valid
    pub fn on_create(&self) {
        let mut lifecycle = self.0.lifecycle.lock();
        match lifecycle.state {
            ScopeState::Created => lifecycle.state = ScopeState::Active,
            ScopeState::Active => {}
            state => tracing::warn!("Cannot revive scope '{}' - it is {state:?}", self.0.name),
        }
    }

    /// Registers a callback to be invoked once this scope is destroyed
    ///
    /// Adding the same callback twice invokes it twice.
    pub fn add_destroy_callback(&self, callback: DestroyCallback) {
        let mut lifecycle = self.0.lifecycle.lock();
        match lifecycle.state {
            ScopeState::Created | ScopeState::Active => lifecycle.callbacks.push(callback),
            state => {
                tracing::debug!(
                    "Ignoring destroy callback - scope '{}' is {state:?}",
                    self.0.name
                );
            }
        }
    }

    /// Removes one registration of the callback
    ///
    /// Returns true if the callback was registered.
    pub fn remove_destroy_callback(&self, callback: &DestroyCallback) -> bool {
        let mut lifecycle = self.0.lifecycle.lock();
        match lifecycle
            .callbacks
            .iter()
            .position(|registered| Arc::ptr_eq(registered, callback))
        {
            Some(index) => {
                lifecycle.callbacks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Destroys the scope
    ///
    /// Invokes every registered callback once in registration order, then destroys all children
    /// and drops the stored values. Calling it again has no effect.
    pub fn on_destroy(&self) {
        let (callbacks, children) = {
            let mut lifecycle = self.0.lifecycle.lock();
            match lifecycle.state {
                ScopeState::Destroying | ScopeState::Destroyed => return,
                ScopeState::Created | ScopeState::Active => {}
            }
            lifecycle.state = ScopeState::Destroying;
            (
                std::mem::take(&mut lifecycle.callbacks),
                std::mem::take(&mut lifecycle.children),
            )
        };

        tracing::debug!(
            "Destroying scope '{}' [{} callbacks, {} children]",
            self.0.name,
            callbacks.len(),
            children.len()
        );

        for callback in &callbacks {
            callback(self);
        }
        for child in children {
            child.on_destroy();
        }

        self.0.lifecycle.lock().state = ScopeState::Destroyed;
        // Dropped outside of the lock, values may hold scopes themselves
        let entries = std::mem::take(&mut *self.0.entries.write());
        drop(entries);

        if let Some(parent) = self.parent() {
            parent
                .0
                .lifecycle
                .lock()
                .children
                .retain(|child| !child.same_scope(self));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Database(&'static str);

    #[test]
    fn child_delegates_to_parent() {
        let root = Scope::root("root");
        root.put(Database("main"));
        let child = root.create_child("request");

        assert_eq!(*child.resolve::<Database>().unwrap(), Database("main"));
        assert!(child.resolve::<String>().is_none());
    }

    #[test]
    fn local_value_shadows_parent() {
        let root = Scope::root("root");
        root.put(Database("main"));
        let child = root.create_child("request");
        child.put(Database("replica"));

        assert_eq!(*child.resolve::<Database>().unwrap(), Database("replica"));
        assert_eq!(*root.resolve::<Database>().unwrap(), Database("main"));
    }

    #[test]
    fn named_values_are_resolvable_by_type() {
        let root = Scope::root("root");
        root.put_named("db", Database("named"));

        assert_eq!(*root.resolve::<Database>().unwrap(), Database("named"));
        assert_eq!(*root.get_named::<Database>("db").unwrap(), Database("named"));
        assert!(root.get_named::<String>("db").is_none());
        assert!(matches!(
            root.require_named::<String>("db"),
            Err(RequireError::DowncastFailed { .. })
        ));
    }

    #[test]
    fn earliest_named_value_wins_type_lookup() {
        let root = Scope::root("root");
        root.put_named("a", "A".to_string());
        root.put_named("b", "B".to_string());
        root.put_named("c", "C".to_string());

        for _ in 0..50 {
            assert_eq!(root.resolve::<String>().unwrap().as_str(), "A");
        }

        // A typed entry always takes precedence
        root.put("typed".to_string());
        assert_eq!(root.resolve::<String>().unwrap().as_str(), "typed");
    }

    #[test]
    fn entries_are_visited_in_insertion_order() {
        let root = Scope::root("root");
        for name in ["z", "m", "a", "q"] {
            root.put_named(name, 0_u8);
        }

        let mut seen = Vec::new();
        let _ = root.for_each_entry(|key, _| {
            seen.push(key.to_string());
            ControlFlow::Continue(())
        });
        assert_eq!(seen, ["z", "m", "a", "q"]);
    }

    #[test]
    fn removing_an_instance_requires_identity() {
        let root = Scope::root("root");
        root.put(Database("first"));
        let stale = Instance::new(Database("stale"));
        assert!(!root.remove_instance(&stale));
        assert!(root.resolve::<Database>().is_some());

        let current = Instance::new(Database("current"));
        root.put_instance(current.clone());
        assert!(root.remove_instance(&current));
        assert!(root.resolve::<Database>().is_none());
        assert!(!root.remove_instance(&current));
    }

    #[test]
    fn resolving_a_scope_returns_itself() {
        let root = Scope::root("root");
        let child = root.create_child("child");

        let resolved = child.resolve::<Scope>().unwrap();
        assert!(resolved.same_scope(&child));
        assert!(child.parent().unwrap().same_scope(&root));
    }

    #[test]
    fn children_are_active_once_created() {
        let root = Scope::root("root");
        let child = root.create_child("child");
        assert_eq!(child.state(), ScopeState::Active);
        assert!(child.is_valid());

        // Repeating the hook changes nothing
        child.on_create();
        assert_eq!(child.state(), ScopeState::Active);
    }

    #[test]
    fn iteration_stops_early() {
        let root = Scope::root("root");
        root.put_named("a", 1_u8);
        root.put_named("b", 2_u8);
        root.put_named("c", 3_u8);
        root.create_child("one");
        root.create_child("two");

        let mut seen = 0;
        let flow = root.for_each_entry(|_, _| {
            seen += 1;
            if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, 2);
        assert!(flow.is_break());

        let mut names = Vec::new();
        let flow = root.for_each_scope(|scope| {
            names.push(scope.name().to_string());
            ControlFlow::Continue(())
        });
        assert!(flow.is_continue());
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn destroy_callbacks_fire_once_in_order() {
        let root = Scope::root("root");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            root.add_destroy_callback(destroy_callback(move |_| order.lock().push(i)));
        }

        root.on_destroy();
        root.on_destroy();

        assert_eq!(*order.lock(), [0, 1, 2]);
        assert_eq!(root.state(), ScopeState::Destroyed);
    }

    #[test]
    fn callbacks_mutating_the_list_still_fire_once() {
        let root = Scope::root("root");
        let calls = Arc::new(AtomicUsize::new(0));

        let self_ref: Arc<Mutex<Option<DestroyCallback>>> = Arc::new(Mutex::new(None));
        let callback = {
            let calls = calls.clone();
            let self_ref = self_ref.clone();
            destroy_callback(move |scope| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = self_ref.lock().clone() {
                    assert!(!scope.remove_destroy_callback(&me));
                    scope.add_destroy_callback(me);
                }
            })
        };
        *self_ref.lock() = Some(callback.clone());
        root.add_destroy_callback(callback);

        root.on_destroy();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let root = Scope::root("root");
        let callback = destroy_callback(|_| panic!("removed callback must not run"));
        root.add_destroy_callback(callback.clone());

        assert!(root.remove_destroy_callback(&callback));
        assert!(!root.remove_destroy_callback(&callback));
        root.on_destroy();
    }

    #[test]
    fn duplicates_are_invoked_per_registration() {
        let root = Scope::root("root");
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = {
            let calls = calls.clone();
            destroy_callback(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        root.add_destroy_callback(callback.clone());
        root.add_destroy_callback(callback.clone());
        assert!(root.remove_destroy_callback(&callback));
        root.add_destroy_callback(callback);

        root.on_destroy();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn destroying_a_parent_destroys_children() {
        let root = Scope::root("root");
        let child = root.create_child("child");
        let grandchild = child.create_child("grandchild");
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            grandchild.add_destroy_callback(destroy_callback(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        root.on_destroy();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(child.state(), ScopeState::Destroyed);
        assert_eq!(grandchild.state(), ScopeState::Destroyed);
    }

    #[test]
    fn destroyed_child_detaches_from_parent() {
        let root = Scope::root("root");
        root.put(Database("main"));
        let child = root.create_child("child");
        child.on_destroy();

        let mut children = 0;
        let _ = root.for_each_scope(|_| {
            children += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(children, 0);
        assert!(child.resolve::<Database>().is_none());
        assert!(matches!(
            child.require::<Database>(),
            Err(RequireError::ScopeDestroyed(_))
        ));
        assert!(root.resolve::<Database>().is_some());
    }

    #[test]
    fn callbacks_can_read_values_during_teardown() {
        let root = Scope::root("root");
        root.put(Database("main"));
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            root.add_destroy_callback(destroy_callback(move |scope| {
                *seen.lock() = scope.resolve::<Database>().map(|db| db.0);
            }));
        }

        root.on_destroy();
        assert_eq!(*seen.lock(), Some("main"));
        assert!(root.resolve::<Database>().is_none());
    }
}
