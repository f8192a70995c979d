#![forbid(unsafe_code)]

//! A concrete [`Subscriber`]: evaluates a getter, tracks what it read, and
//! re-runs when any of it changes.
//!
//! # Design
//!
//! Each evaluation enters the evaluation stack, runs the getter (and
//! [`traverse`]s the result for deep watchers), leaves the stack, then
//! reconciles dependencies: registries read this run are kept, registries
//! read last run but not this one are unsubscribed from.
//!
//! # Invariants
//!
//! 1. Within one evaluation a registry is recorded at most once, and the
//!    watcher is added to a registry's subscriber list only if it was not
//!    already subscribed from the previous evaluation.
//! 2. After every evaluation (including one whose getter panicked) the stack
//!    is back to its prior depth and the dependency sets are reconciled.
//! 3. A torn-down watcher never re-evaluates.
//!
//! # Modes
//!
//! | Option  | `update()` does                                        |
//! |---------|--------------------------------------------------------|
//! | `lazy`  | marks dirty; [`Watcher::read`] re-evaluates on demand  |
//! | `sync`  | re-runs immediately                                    |
//! | neither | hands itself to the [`Scheduler`], or re-runs if none |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::error::Result;
use crate::observe::Value;
use crate::registry::{Registry, RegistryId};
use crate::stack::{ActiveGuard, EvaluationStack};
use crate::subscriber::{Subscriber, SubscriberId, SubscriberRef};
use crate::traverse::traverse;

pub type Getter = Box<dyn Fn() -> Value>;
pub type Callback = Box<dyn Fn(&Value, &Value) -> Result<()>>;

/// Box a change callback.
pub fn callback(f: impl Fn(&Value, &Value) -> Result<()> + 'static) -> Option<Callback> {
    Some(Box::new(f))
}

/// Batches and orders watcher re-runs. Implemented outside this crate.
pub trait Scheduler {
    fn queue(&self, watcher: Rc<Watcher>);
}

/// Construction options for [`Watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    pub lazy: bool,
    pub deep: bool,
    pub sync: bool,
    pub label: Option<String>,
    pub scheduler: Option<Rc<dyn Scheduler>>,
}

impl WatcherOptions {
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    #[must_use]
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    #[must_use]
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("lazy", &self.lazy)
            .field("deep", &self.deep)
            .field("sync", &self.sync)
            .field("label", &self.label)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

#[derive(Default)]
struct DepSet {
    registries: Vec<Registry>,
    ids: AHashSet<RegistryId>,
}

impl DepSet {
    fn clear(&mut self) {
        self.registries.clear();
        self.ids.clear();
    }
}

/// Re-evaluating subscriber over a [`Value`]-producing getter.
pub struct Watcher {
    id: SubscriberId,
    this: Weak<Watcher>,
    options: WatcherOptions,
    getter: Getter,
    callback: Option<Callback>,
    stack: EvaluationStack,
    value: RefCell<Value>,
    dirty: Cell<bool>,
    active: Cell<bool>,
    deps: RefCell<DepSet>,
    new_deps: RefCell<DepSet>,
    runs: Cell<u64>,
}

impl Watcher {
    /// Create a watcher on this thread's default stack. Non-lazy watchers
    /// evaluate immediately.
    pub fn new(
        getter: impl Fn() -> Value + 'static,
        options: WatcherOptions,
        callback: Option<Callback>,
    ) -> Rc<Self> {
        Self::with_stack(EvaluationStack::current(), getter, options, callback)
    }

    pub fn with_stack(
        stack: EvaluationStack,
        getter: impl Fn() -> Value + 'static,
        options: WatcherOptions,
        callback: Option<Callback>,
    ) -> Rc<Self> {
        let lazy = options.lazy;
        let watcher = Rc::new_cyclic(|this| Self {
            id: SubscriberId::next(),
            this: this.clone(),
            options,
            getter: Box::new(getter),
            callback,
            stack,
            value: RefCell::new(Value::Null),
            dirty: Cell::new(lazy),
            active: Cell::new(true),
            deps: RefCell::new(DepSet::default()),
            new_deps: RefCell::new(DepSet::default()),
            runs: Cell::new(0),
        });
        if !lazy {
            let value = watcher.get();
            watcher.value.replace(value);
        }
        watcher
    }

    /// Lazy watcher, evaluated on first [`read`](Self::read).
    pub fn computed(getter: impl Fn() -> Value + 'static) -> Rc<Self> {
        Self::new(getter, WatcherOptions::default().lazy(), None)
    }

    fn handle(&self) -> Option<SubscriberRef> {
        self.this.upgrade().map(|this| this as SubscriberRef)
    }

    /// Evaluate the getter with this watcher active and reconcile
    /// dependencies.
    pub fn get(&self) -> Value {
        let guard = match self.handle() {
            Some(this) => self.stack.enter(this),
            None => self.stack.enter_untracked(),
        };
        let evaluation = Evaluation {
            watcher: self,
            active: Some(guard),
        };
        let value = (self.getter)();
        if self.options.deep {
            traverse(&value);
        }
        drop(evaluation);
        value
    }

    /// Re-evaluate and fire the callback when the value changed, is a
    /// container, or the watcher is deep.
    pub fn run(&self) -> Result<()> {
        if !self.active.get() {
            return Ok(());
        }
        let value = self.get();
        let old = self.value.borrow().clone();
        if value != old || value.is_container() || self.options.deep {
            self.value.replace(value.clone());
            self.runs.set(self.runs.get() + 1);
            tracing::trace!(
                message = "watcher.run",
                watcher = self.id.raw(),
                runs = self.runs.get(),
            );
            if let Some(callback) = &self.callback {
                callback(&value, &old)?;
            }
        }
        Ok(())
    }

    /// Evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) -> Value {
        let value = self.get();
        self.value.replace(value.clone());
        self.dirty.set(false);
        value
    }

    /// Computed-style read: evaluate if dirty, then make the currently
    /// active subscriber depend on everything this watcher depends on.
    pub fn read(&self) -> Value {
        if self.dirty.get() {
            self.evaluate();
        }
        if self.stack.is_tracking() {
            self.depend();
        }
        self.value()
    }

    /// Re-attribute every current dependency to the active subscriber.
    pub fn depend(&self) {
        let registries = self.deps.borrow().registries.clone();
        for registry in registries {
            registry.depend();
        }
    }

    /// Unsubscribe from every registry and stop reacting.
    pub fn teardown(&self) {
        if !self.active.replace(false) {
            return;
        }
        let registries = std::mem::take(&mut *self.deps.borrow_mut());
        if let Some(this) = self.handle() {
            for registry in &registries.registries {
                registry.remove_subscriber(&this);
            }
        }
    }

    fn cleanup_deps(&self) {
        let stale: Vec<Registry> = {
            let new_deps = self.new_deps.borrow();
            self.deps
                .borrow()
                .registries
                .iter()
                .filter(|registry| !new_deps.ids.contains(&registry.id()))
                .cloned()
                .collect()
        };
        if let Some(this) = self.handle() {
            for registry in &stale {
                registry.remove_subscriber(&this);
            }
        }
        let mut deps = self.deps.borrow_mut();
        let mut new_deps = self.new_deps.borrow_mut();
        std::mem::swap(&mut *deps, &mut *new_deps);
        new_deps.clear();
    }

    #[must_use]
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// How many times `run()` observed a change.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.get()
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.options.label.as_deref()
    }

    /// Ids of the registries read during the last evaluation, in read order.
    #[must_use]
    pub fn dependency_ids(&self) -> Vec<RegistryId> {
        self.deps
            .borrow()
            .registries
            .iter()
            .map(Registry::id)
            .collect()
    }
}

impl Subscriber for Watcher {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn update(&self) -> Result<()> {
        if self.options.lazy {
            self.dirty.set(true);
            return Ok(());
        }
        if !self.options.sync
            && let Some(scheduler) = &self.options.scheduler
        {
            if let Some(this) = self.this.upgrade() {
                scheduler.queue(this);
            }
            return Ok(());
        }
        self.run()
    }

    fn add_dependency(&self, registry: &Registry) {
        let id = registry.id();
        if !self.new_deps.borrow_mut().ids.insert(id) {
            return;
        }
        self.new_deps.borrow_mut().registries.push(registry.clone());
        if !self.deps.borrow().ids.contains(&id)
            && let Some(this) = self.handle()
        {
            registry.add_subscriber(&this);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("label", &self.options.label)
            .field("dirty", &self.dirty.get())
            .field("active", &self.active.get())
            .field("deps", &self.dependency_ids())
            .finish()
    }
}

/// Pops the stack, then reconciles dependencies, on every exit path.
struct Evaluation<'a> {
    watcher: &'a Watcher,
    active: Option<ActiveGuard>,
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        drop(self.active.take());
        self.watcher.cleanup_deps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CapturedReports;
    use crate::error::ReactiveError;
    use crate::observe::{Map, ReactiveField};

    #[test]
    fn collects_dependencies_and_reacts() {
        let a = ReactiveField::new(Value::from(1));
        let b = ReactiveField::new(Value::from(2));
        let (a2, b2) = (a.clone(), b.clone());
        let watcher = Watcher::new(
            move || {
                let sum = a2.get().as_int().unwrap_or(0) + b2.get().as_int().unwrap_or(0);
                Value::from(sum)
            },
            WatcherOptions::default().sync(),
            None,
        );
        assert_eq!(watcher.value(), Value::from(3));
        assert_eq!(
            watcher.dependency_ids(),
            vec![a.registry().id(), b.registry().id()]
        );

        a.set(Value::from(10));
        assert_eq!(watcher.value(), Value::from(12));
        assert_eq!(watcher.runs(), 1);
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let a = ReactiveField::new(Value::from(1));
        let a2 = a.clone();
        let watcher = Watcher::new(
            move || {
                let _ = a2.get();
                let _ = a2.get();
                a2.get()
            },
            WatcherOptions::default().sync(),
            None,
        );
        assert_eq!(a.registry().subscriber_count(), 1);
        a.set(Value::from(2));
        assert_eq!(a.registry().subscriber_count(), 1);
        assert_eq!(watcher.dependency_ids().len(), 1);
    }

    #[test]
    fn stale_dependencies_are_dropped_between_runs() {
        let flag = ReactiveField::new(Value::from(true));
        let left = ReactiveField::new(Value::from("left"));
        let right = ReactiveField::new(Value::from("right"));
        let (f2, l2, r2) = (flag.clone(), left.clone(), right.clone());
        let _watcher = Watcher::new(
            move || {
                if f2.get() == Value::from(true) {
                    l2.get()
                } else {
                    r2.get()
                }
            },
            WatcherOptions::default().sync(),
            None,
        );
        assert_eq!(left.registry().subscriber_count(), 1);
        assert_eq!(right.registry().subscriber_count(), 0);

        flag.set(Value::from(false));
        assert_eq!(left.registry().subscriber_count(), 0);
        assert_eq!(right.registry().subscriber_count(), 1);
    }

    #[test]
    fn callback_receives_new_and_old() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = Rc::clone(&seen);
        let source = ReactiveField::new(Value::from(1));
        let s2 = source.clone();
        let _watcher = Watcher::new(
            move || s2.get(),
            WatcherOptions::default().sync(),
            callback(move |new, old| {
                seen_cb.borrow_mut().push((new.clone(), old.clone()));
                Ok(())
            }),
        );
        source.set(Value::from(2));
        source.set(Value::from(3));
        assert_eq!(
            *seen.borrow(),
            vec![
                (Value::from(2), Value::from(1)),
                (Value::from(3), Value::from(2)),
            ]
        );
    }

    #[test]
    fn callback_error_is_reported_and_returned() {
        let captured = CapturedReports::install();
        let source = ReactiveField::new(Value::from(1));
        let s2 = source.clone();
        let watcher = Watcher::new(
            move || s2.get(),
            WatcherOptions::default().sync(),
            callback(|_, _| Err(ReactiveError::callback("rejected"))),
        );

        source.set(Value::from(5));
        assert_eq!(watcher.value(), Value::from(5));
        let errors = captured.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ReactiveError::UpdateFailed { subscriber, message }
                if *subscriber == watcher.id() && message.contains("rejected")
        ));

        // Unchanged value: the callback is not consulted again.
        assert_eq!(watcher.run(), Ok(()));
    }

    #[test]
    fn lazy_watcher_marks_dirty_and_reevaluates_on_read() {
        let evaluations = Rc::new(Cell::new(0));
        let count = Rc::clone(&evaluations);
        let source = ReactiveField::new(Value::from(2));
        let s2 = source.clone();
        let doubled = Watcher::computed(move || {
            count.set(count.get() + 1);
            Value::from(s2.get().as_int().unwrap_or(0) * 2)
        });
        assert!(doubled.is_dirty());
        assert_eq!(evaluations.get(), 0);

        assert_eq!(doubled.read(), Value::from(4));
        assert_eq!(doubled.read(), Value::from(4));
        assert_eq!(evaluations.get(), 1);

        source.set(Value::from(5));
        assert!(doubled.is_dirty());
        assert_eq!(doubled.read(), Value::from(10));
        assert_eq!(evaluations.get(), 2);
    }

    #[test]
    fn nested_evaluation_attributes_reads_to_innermost() {
        let a = ReactiveField::new(Value::from(1));
        let b = ReactiveField::new(Value::from(2));
        let c = ReactiveField::new(Value::from(3));
        let b2 = b.clone();
        let inner = Watcher::computed(move || b2.get());
        let (a2, c2, inner2) = (a.clone(), c.clone(), Rc::clone(&inner));
        let outer = Watcher::new(
            move || {
                let _ = a2.get();
                let _ = inner2.evaluate();
                c2.get()
            },
            WatcherOptions::default().sync(),
            None,
        );
        assert_eq!(inner.dependency_ids(), vec![b.registry().id()]);
        assert_eq!(
            outer.dependency_ids(),
            vec![a.registry().id(), c.registry().id()]
        );
    }

    #[test]
    fn computed_read_propagates_dependencies_outward() {
        let b = ReactiveField::new(Value::from(2));
        let b2 = b.clone();
        let inner = Watcher::computed(move || b2.get());
        let inner2 = Rc::clone(&inner);
        let outer = Watcher::new(move || inner2.read(), WatcherOptions::default().sync(), None);
        assert_eq!(outer.dependency_ids(), vec![b.registry().id()]);

        b.set(Value::from(7));
        assert_eq!(outer.value(), Value::from(7));
    }

    #[test]
    fn teardown_unsubscribes_everywhere() {
        let a = ReactiveField::new(Value::from(1));
        let a2 = a.clone();
        let watcher = Watcher::new(move || a2.get(), WatcherOptions::default().sync(), None);
        assert_eq!(a.registry().subscriber_count(), 1);
        watcher.teardown();
        assert!(!watcher.is_active());
        assert_eq!(a.registry().subscriber_count(), 0);
        a.set(Value::from(2));
        assert_eq!(watcher.value(), Value::from(1));
    }

    #[test]
    fn deep_watcher_sees_nested_writes() {
        let inner = Map::new([("leaf", Value::from(1))]);
        let root = ReactiveField::new(Value::map([("inner", Value::Map(inner.clone()))]));
        let runs = Rc::new(Cell::new(0));
        let runs_cb = Rc::clone(&runs);
        let r2 = root.clone();
        let _watcher = Watcher::new(
            move || r2.get(),
            WatcherOptions::default().sync().deep(),
            callback(move |_, _| {
                runs_cb.set(runs_cb.get() + 1);
                Ok(())
            }),
        );
        inner.insert("leaf", Value::from(2)).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn deep_watcher_sees_key_insertion_in_list_element_map() {
        let elem = Map::new([("a", Value::from(1))]);
        let root = ReactiveField::new(Value::list([Value::Map(elem.clone())]));
        let r2 = root.clone();
        let watcher = Watcher::new(
            move || r2.get(),
            WatcherOptions::default().sync().deep(),
            None,
        );
        elem.insert("b", Value::from(2)).unwrap();
        assert_eq!(watcher.runs(), 1);
        elem.remove("a").unwrap();
        assert_eq!(watcher.runs(), 2);
    }

    #[test]
    fn deep_watcher_sees_key_insertion_in_root_map() {
        let map = Map::new([("a", Value::from(1))]);
        let source = map.clone();
        let watcher = Watcher::new(
            move || Value::Map(source.clone()),
            WatcherOptions::default().sync().deep(),
            None,
        );
        map.insert("b", Value::from(2)).unwrap();
        assert_eq!(watcher.runs(), 1);
    }

    #[test]
    fn shallow_watcher_ignores_nested_writes() {
        let inner = Map::new([("leaf", Value::from(1))]);
        let root = ReactiveField::new(Value::map([("inner", Value::Map(inner.clone()))]));
        let r2 = root.clone();
        let watcher = Watcher::new(move || r2.get(), WatcherOptions::default().sync(), None);
        inner.insert("leaf", Value::from(2)).unwrap();
        assert_eq!(watcher.runs(), 0);
    }

    #[test]
    fn scheduler_receives_non_sync_updates() {
        #[derive(Default)]
        struct Queue(RefCell<Vec<SubscriberId>>);
        impl Scheduler for Queue {
            fn queue(&self, watcher: Rc<Watcher>) {
                self.0.borrow_mut().push(watcher.id());
            }
        }

        let queue = Rc::new(Queue::default());
        let source = ReactiveField::new(Value::from(1));
        let s2 = source.clone();
        let watcher = Watcher::new(
            move || s2.get(),
            WatcherOptions::default().scheduler(Rc::clone(&queue) as Rc<dyn Scheduler>),
            None,
        );
        source.set(Value::from(2));
        assert_eq!(*queue.0.borrow(), vec![watcher.id()]);
        assert_eq!(watcher.value(), Value::from(1));

        watcher.run().unwrap();
        assert_eq!(watcher.value(), Value::from(2));
    }

    #[test]
    fn panicking_getter_leaves_stack_balanced() {
        let stack = EvaluationStack::current();
        let depth = stack.depth();
        let armed = Rc::new(Cell::new(false));
        let armed2 = Rc::clone(&armed);
        let watcher = Watcher::new(
            move || {
                if armed2.get() {
                    panic!("getter failed");
                }
                Value::Null
            },
            WatcherOptions::default().sync(),
            None,
        );
        armed.set(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| watcher.get()));
        assert!(result.is_err());
        assert_eq!(stack.depth(), depth);
    }
}
