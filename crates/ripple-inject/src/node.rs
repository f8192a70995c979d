#![forbid(unsafe_code)]

//! The hierarchy provide/inject runs over.
//!
//! A [`Node`] has at most one parent, an optional provider record computed
//! once at initialization, and a table of reactive fields that injections
//! are installed into.
//!
//! # Invariants
//!
//! 1. Parent links are fixed at construction, so the ancestor chain is
//!    acyclic.
//! 2. The provider record is written once, before injections resolve, and
//!    is never observed: reading it records no dependency.
//! 3. No `RefCell` borrow is held across a call into a factory or a field
//!    write, so factories and write hooks may read the node.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use ripple_core::{ReactiveField, Value};

use crate::inject::{init_injections, init_provide};
use crate::key::Key;
use crate::request::{Injections, Provide, Provided};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct NodeInner {
    id: NodeId,
    label: Option<String>,
    parent: Option<Node>,
    provide: Option<Provide>,
    inject: Option<Injections>,
    provided: RefCell<Option<Rc<Provided>>>,
    fields: RefCell<IndexMap<Key, ReactiveField>>,
}

/// Shared handle to a node.
///
/// Cloning creates a new handle to the **same** node.
#[derive(Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

impl Node {
    /// A parentless node with no declarations.
    #[must_use]
    pub fn root() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Node> {
        self.inner.parent.as_ref()
    }

    /// This node followed by each ancestor, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = Node> {
        std::iter::successors(Some(self.clone()), |node| node.parent().cloned())
    }

    /// Human-readable name used as diagnostic context.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.label() {
            Some(label) => format!("<{label}>"),
            None => format!("<anonymous node {}>", self.inner.id),
        }
    }

    #[must_use]
    pub fn provide_declaration(&self) -> Option<&Provide> {
        self.inner.provide.as_ref()
    }

    #[must_use]
    pub fn inject_declaration(&self) -> Option<&Injections> {
        self.inner.inject.as_ref()
    }

    /// The provider record, if this node provides anything.
    #[must_use]
    pub fn provided(&self) -> Option<Rc<Provided>> {
        self.inner.provided.borrow().clone()
    }

    /// Whether this node's own provider record contains `key`.
    #[must_use]
    pub fn provides(&self, key: &Key) -> bool {
        self.inner
            .provided
            .borrow()
            .as_ref()
            .is_some_and(|record| record.contains_key(key))
    }

    /// Value this node itself provides under `key`. Untracked.
    #[must_use]
    pub fn provided_value(&self, key: &Key) -> Option<Value> {
        self.inner
            .provided
            .borrow()
            .as_ref()
            .and_then(|record| record.get(key).cloned())
    }

    pub(crate) fn attach_provided(&self, record: Provided) {
        self.inner.provided.replace(Some(Rc::new(record)));
    }

    /// Install `field` under `key`, replacing any previous field.
    pub fn define_field(&self, key: impl Into<Key>, field: ReactiveField) {
        self.inner.fields.borrow_mut().insert(key.into(), field);
    }

    #[must_use]
    pub fn field(&self, key: impl Into<Key>) -> Option<ReactiveField> {
        self.inner.fields.borrow().get(&key.into()).cloned()
    }

    /// Tracked read of a field.
    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.field(key).map(|field| field.get())
    }

    /// Write a field. Runs the field's write hook first. Returns false when
    /// the field does not exist or the value is unchanged.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        match self.field(key) {
            Some(field) => field.set(value.into()),
            None => false,
        }
    }

    #[must_use]
    pub fn has_field(&self, key: impl Into<Key>) -> bool {
        self.inner.fields.borrow().contains_key(&key.into())
    }

    /// Field keys in installation order.
    #[must_use]
    pub fn field_keys(&self) -> Vec<Key> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("parent", &self.parent().map(Node::id))
            .field("fields", &self.field_keys())
            .finish()
    }
}

/// Builder for [`Node`]. [`build`](Self::build) runs the provide step, then
/// the inject step.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    label: Option<String>,
    parent: Option<Node>,
    provide: Option<Provide>,
    inject: Option<Injections>,
}

impl NodeBuilder {
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: &Node) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    #[must_use]
    pub fn provide(mut self, provide: Provide) -> Self {
        self.provide = Some(provide);
        self
    }

    #[must_use]
    pub fn inject(mut self, inject: Injections) -> Self {
        self.inject = Some(inject);
        self
    }

    /// Construct the node without running the lifecycle hooks.
    #[must_use]
    pub fn build_uninitialized(self) -> Node {
        Node {
            inner: Rc::new(NodeInner {
                id: NodeId::next(),
                label: self.label,
                parent: self.parent,
                provide: self.provide,
                inject: self.inject,
                provided: RefCell::new(None),
                fields: RefCell::new(IndexMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn build(self) -> Node {
        let node = self.build_uninitialized();
        init_provide(&node);
        init_injections(&node);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_starts_at_self() {
        let root = Node::builder().label("Root").build();
        let mid = Node::builder().parent(&root).build();
        let leaf = Node::builder().parent(&mid).build();

        let ids: Vec<_> = leaf.lineage().map(|n| n.id()).collect();
        assert_eq!(ids, vec![leaf.id(), mid.id(), root.id()]);
        assert!(leaf.parent().unwrap().ptr_eq(&mid));
        assert!(root.parent().is_none());
    }

    #[test]
    fn describe_uses_label_when_present() {
        assert_eq!(Node::builder().label("App").build().describe(), "<App>");
        let anon = Node::root();
        assert!(anon.describe().starts_with("<anonymous node #"));
    }

    #[test]
    fn fields_round_trip_and_keep_order() {
        let node = Node::root();
        node.define_field("b", ReactiveField::new(Value::from(1)));
        node.define_field("a", ReactiveField::new(Value::from(2)));

        assert_eq!(node.field_keys(), vec![Key::from("b"), Key::from("a")]);
        assert!(node.has_field("a"));
        assert!(!node.has_field("c"));

        assert!(node.set("a", 3));
        assert!(!node.set("a", 3));
        assert!(!node.set("c", 3));
        assert_eq!(node.get("a"), Some(Value::from(3)));
        assert_eq!(node.get("c"), None);
    }

    #[test]
    fn provider_record_is_absent_without_declaration() {
        let node = Node::root();
        assert!(node.provided().is_none());
        assert!(!node.provides(&Key::from("a")));
        assert!(node.provided_value(&Key::from("a")).is_none());
    }

    #[test]
    fn uninitialized_nodes_skip_hooks() {
        let node = Node::builder()
            .provide(Provide::values([("a", Value::from(1))]))
            .build_uninitialized();
        assert!(node.provided().is_none());
        init_provide(&node);
        assert!(node.provides(&Key::from("a")));
    }
}
