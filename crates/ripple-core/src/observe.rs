#![forbid(unsafe_code)]

//! Dynamic values, observed containers, and reactive fields.
//!
//! This is the read/write interception layer the engine plugs into:
//!
//! - [`ReactiveField`] pairs a [`Value`] with a [`Registry`]. `get()` calls
//!   `depend()`, `set()` calls `notify()`.
//! - [`List`] and [`Map`] are shared containers. A container created while
//!   observation is on carries its own registry (exposed through
//!   [`ObservedContainer`]); one created while it is off, or created frozen,
//!   does not.
//! - [`RenderNode`] is an opaque leaf that traversal never enters.
//!
//! # Observation toggle
//!
//! Observation is a thread-local flag, on by default. [`ObservingPaused`]
//! switches it off for a scope and restores the previous state on drop.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one is a no-op (no hook call, no
//!    notification). Containers compare by identity, floats treat NaN as
//!    equal to NaN.
//! 2. Frozen containers reject every mutation with
//!    [`ReactiveError::FrozenValue`] and their reads are never tracked.
//! 3. No `RefCell` borrow is held while `depend()`/`notify()` run.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ReactiveError, Result};
use crate::registry::Registry;

thread_local! {
    static OBSERVING: Cell<bool> = const { Cell::new(true) };
}

/// Whether containers created now get their own registry.
#[must_use]
pub fn is_observing() -> bool {
    OBSERVING.with(Cell::get)
}

/// Switch observation on or off for this thread.
pub fn set_observing(enabled: bool) {
    OBSERVING.with(|cell| cell.set(enabled));
}

/// RAII guard that pauses observation until dropped.
#[derive(Debug)]
pub struct ObservingPaused {
    previous: bool,
}

impl ObservingPaused {
    #[must_use = "observation resumes as soon as the guard is dropped"]
    pub fn new() -> Self {
        let previous = is_observing();
        set_observing(false);
        Self { previous }
    }
}

impl Default for ObservingPaused {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObservingPaused {
    fn drop(&mut self) {
        set_observing(self.previous);
    }
}

/// Capability of a container that carries its own registry.
pub trait ObservedContainer {
    /// The container's own registry, if it is observed.
    fn registry(&self) -> Option<&Registry>;

    /// Frozen containers are never observed nor traversed.
    fn is_frozen(&self) -> bool;

    /// Address-based identity, stable while the container is alive.
    fn identity(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(List),
    Map(Map),
    RenderNode(RenderNode),
}

impl Value {
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// New list, observed iff observation is on.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(List::new(items))
    }

    /// New map, observed iff observation is on.
    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Map::new(entries))
    }

    /// The container capability, for list and map variants.
    #[must_use]
    pub fn as_container(&self) -> Option<&dyn ObservedContainer> {
        match self {
            Self::List(list) => Some(list),
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The registry of an observed container.
    #[must_use]
    pub fn registry(&self) -> Option<Registry> {
        self.as_container()
            .and_then(|c| c.registry())
            .cloned()
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::RenderNode(a), Self::RenderNode(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(list) => fmt::Debug::fmt(list, f),
            Self::Map(map) => fmt::Debug::fmt(map, f),
            Self::RenderNode(node) => fmt::Debug::fmt(node, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}

impl From<RenderNode> for Value {
    fn from(node: RenderNode) -> Self {
        Self::RenderNode(node)
    }
}

// ---------------------------------------------------------------------------
// ReactiveField
// ---------------------------------------------------------------------------

/// Hook run before a changing write lands. Receives the incoming value.
pub type WriteHook = Rc<dyn Fn(&Value)>;

struct FieldInner {
    value: RefCell<Value>,
    registry: Registry,
    on_write: Option<WriteHook>,
}

/// A value slot whose reads are tracked and whose writes notify.
///
/// Cloning creates a new handle to the **same** slot.
#[derive(Clone)]
pub struct ReactiveField {
    inner: Rc<FieldInner>,
}

impl ReactiveField {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self::with_registry(value, Registry::new(), None)
    }

    /// Field whose writes first call `hook` with the incoming value.
    #[must_use]
    pub fn with_write_hook(value: Value, hook: WriteHook) -> Self {
        Self::with_registry(value, Registry::new(), Some(hook))
    }

    #[must_use]
    pub fn with_registry(value: Value, registry: Registry, on_write: Option<WriteHook>) -> Self {
        Self {
            inner: Rc::new(FieldInner {
                value: RefCell::new(value),
                registry,
                on_write,
            }),
        }
    }

    /// Tracked read.
    #[must_use]
    pub fn get(&self) -> Value {
        self.depend();
        self.peek()
    }

    /// Untracked read.
    #[must_use]
    pub fn peek(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Register the active subscriber on this field and, when the value is
    /// an observed container, on the container too.
    pub fn depend(&self) {
        self.inner.registry.depend();
        let child = self.inner.value.borrow().registry();
        if let Some(child) = child {
            child.depend();
        }
    }

    /// Write `value`. Returns false (and does nothing) when it equals the
    /// current value.
    pub fn set(&self, value: Value) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        if let Some(hook) = &self.inner.on_write {
            hook(&value);
        }
        let previous = self.inner.value.replace(value);
        drop(previous);
        self.inner.registry.notify();
        true
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn has_write_hook(&self) -> bool {
        self.inner.on_write.is_some()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ReactiveField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveField")
            .field("value", &*self.inner.value.borrow())
            .field("registry", &self.inner.registry.id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

struct ContainerMeta {
    registry: Option<Registry>,
    frozen: bool,
}

impl ContainerMeta {
    fn fresh() -> Self {
        Self {
            registry: is_observing().then(Registry::new),
            frozen: false,
        }
    }

    fn frozen() -> Self {
        Self {
            registry: None,
            frozen: true,
        }
    }

    fn depend(&self) {
        if let Some(registry) = &self.registry {
            registry.depend();
        }
    }

    fn notify(&self) {
        if let Some(registry) = &self.registry {
            registry.notify();
        }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            Err(ReactiveError::FrozenValue)
        } else {
            Ok(())
        }
    }
}

struct ListInner {
    meta: ContainerMeta,
    items: RefCell<Vec<Value>>,
}

/// Shared sequence. Reads depend on, and mutations notify, the list's own
/// registry.
#[derive(Clone)]
pub struct List {
    inner: Rc<ListInner>,
}

impl List {
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        Self::build(ContainerMeta::fresh(), items)
    }

    /// Immutable, never-observed list.
    #[must_use]
    pub fn frozen(items: impl IntoIterator<Item = Value>) -> Self {
        Self::build(ContainerMeta::frozen(), items)
    }

    fn build(meta: ContainerMeta, items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                meta,
                items: RefCell::new(items.into_iter().collect()),
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.meta.depend();
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.meta.depend();
        self.inner.items.borrow().get(index).cloned()
    }

    /// Tracked copy of every element.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        self.inner.meta.depend();
        self.peek_items()
    }

    /// Untracked copy of every element.
    #[must_use]
    pub fn peek_items(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub fn push(&self, value: Value) -> Result<()> {
        self.inner.meta.check_mutable()?;
        self.inner.items.borrow_mut().push(value);
        self.inner.meta.notify();
        Ok(())
    }

    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        self.inner.meta.check_mutable()?;
        let previous = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(ReactiveError::IndexOutOfBounds { index, len })?;
            std::mem::replace(slot, value)
        };
        drop(previous);
        self.inner.meta.notify();
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        self.inner.meta.check_mutable()?;
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            if index >= len {
                return Err(ReactiveError::IndexOutOfBounds { index, len });
            }
            items.remove(index)
        };
        self.inner.meta.notify();
        Ok(removed)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ObservedContainer for List {
    fn registry(&self) -> Option<&Registry> {
        self.inner.meta.registry.as_ref()
    }

    fn is_frozen(&self) -> bool {
        self.inner.meta.frozen
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Elements may reference this list; print shape only.
        f.debug_struct("List")
            .field("registry", &self.inner.meta.registry.as_ref().map(Registry::id))
            .field("frozen", &self.inner.meta.frozen)
            .field("len", &self.inner.items.borrow().len())
            .finish()
    }
}

struct MapInner {
    meta: ContainerMeta,
    entries: RefCell<IndexMap<String, ReactiveField>>,
}

/// Shared keyed container whose entries are [`ReactiveField`]s, kept in
/// insertion order.
#[derive(Clone)]
pub struct Map {
    inner: Rc<MapInner>,
}

impl Map {
    #[must_use]
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::build(ContainerMeta::fresh(), entries)
    }

    /// Immutable, never-observed map.
    #[must_use]
    pub fn frozen<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::build(ContainerMeta::frozen(), entries)
    }

    fn build<K: Into<String>>(
        meta: ContainerMeta,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), ReactiveField::new(v)))
            .collect();
        Self {
            inner: Rc::new(MapInner {
                meta,
                entries: RefCell::new(entries),
            }),
        }
    }

    /// Tracked read of `key`. A missing key depends on the map itself so a
    /// later insertion is observed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let field = self.inner.entries.borrow().get(key).cloned();
        match field {
            Some(field) if self.inner.meta.frozen => Some(field.peek()),
            Some(field) => Some(field.get()),
            None => {
                self.inner.meta.depend();
                None
            }
        }
    }

    /// The field behind `key`, untracked.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<ReactiveField> {
        self.inner.entries.borrow().get(key).cloned()
    }

    /// Every field in insertion order, untracked.
    #[must_use]
    pub fn fields(&self) -> Vec<ReactiveField> {
        self.inner.entries.borrow().values().cloned().collect()
    }

    /// Tracked key listing.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.meta.depend();
        self.inner.entries.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.meta.depend();
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write an existing key through its field, or add a new key and notify
    /// the map's own registry.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.inner.meta.check_mutable()?;
        let key = key.into();
        let existing = self.inner.entries.borrow().get(&key).cloned();
        match existing {
            Some(field) => {
                field.set(value);
            }
            None => {
                self.inner
                    .entries
                    .borrow_mut()
                    .insert(key, ReactiveField::new(value));
                self.inner.meta.notify();
            }
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.inner.meta.check_mutable()?;
        let removed = self.inner.entries.borrow_mut().shift_remove(key);
        match removed {
            Some(field) => {
                let value = field.peek();
                self.inner.meta.notify();
                field.registry().notify();
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ObservedContainer for Map {
    fn registry(&self) -> Option<&Registry> {
        self.inner.meta.registry.as_ref()
    }

    fn is_frozen(&self) -> bool {
        self.inner.meta.frozen
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("registry", &self.inner.meta.registry.as_ref().map(Registry::id))
            .field("frozen", &self.inner.meta.frozen)
            .field("keys", &self.inner.entries.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RenderNode
// ---------------------------------------------------------------------------

/// Opaque rendering-node handle. Traversal treats it as a leaf even when
/// its payload references observed data.
#[derive(Clone)]
pub struct RenderNode {
    tag: Rc<str>,
    payload: Rc<dyn Any>,
}

impl RenderNode {
    #[must_use]
    pub fn new(tag: &str, payload: impl Any) -> Self {
        Self {
            tag: Rc::from(tag),
            payload: Rc::new(payload),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderNode").field("tag", &self.tag).finish()
    }
}
