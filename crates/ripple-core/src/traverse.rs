#![forbid(unsafe_code)]

//! Deep traversal: touch every reactive field reachable from a value so the
//! active subscriber depends on all of them.
//!
//! # Invariants
//!
//! 1. An observed container is entered at most once per top-level call,
//!    keyed by its registry id. Unobserved containers are keyed by identity,
//!    so cyclic graphs terminate either way.
//! 2. Primitives, frozen containers and [`RenderNode`](crate::observe::RenderNode)s
//!    are leaves.
//! 3. The seen-sets are empty once [`Traversal::run`] returns.
//! 4. Every entered observed container has its own registry depended on, so
//!    key insertion and removal anywhere below the root are tracked.
//!
//! The walk uses an explicit worklist, so depth is bounded by heap, not by
//! the native stack.

use ahash::AHashSet;

use crate::observe::Value;
use crate::registry::RegistryId;

/// Reusable traversal state.
#[derive(Debug, Default)]
pub struct Traversal {
    seen: AHashSet<RegistryId>,
    seen_plain: AHashSet<usize>,
    visited: usize,
}

impl Traversal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `value`, then clear the seen-sets. Returns how many containers
    /// were entered.
    pub fn run(&mut self, value: &Value) -> usize {
        self.visited = 0;
        self.walk(value);
        self.seen.clear();
        self.seen_plain.clear();
        tracing::trace!(message = "traverse.done", containers = self.visited);
        self.visited
    }

    /// Entries currently in the seen-sets.
    #[must_use]
    pub fn seen_len(&self) -> usize {
        self.seen.len() + self.seen_plain.len()
    }

    fn walk(&mut self, root: &Value) {
        let mut pending = vec![root.clone()];
        while let Some(value) = pending.pop() {
            let Some(container) = value.as_container() else {
                continue;
            };
            if container.is_frozen() {
                continue;
            }
            let first_visit = match container.registry() {
                Some(registry) => self.seen.insert(registry.id()),
                None => self.seen_plain.insert(container.identity()),
            };
            if !first_visit {
                continue;
            }
            if let Some(registry) = container.registry() {
                registry.depend();
            }
            self.visited += 1;
            match &value {
                Value::List(list) => pending.extend(list.items()),
                Value::Map(map) => pending.extend(map.fields().iter().map(|field| field.get())),
                _ => {}
            }
        }
    }
}

/// Collect every nested reactive field of `value` as a dependency of the
/// active subscriber.
pub fn traverse(value: &Value) {
    Traversal::new().run(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{List, Map, ObservedContainer, ObservingPaused, ReactiveField, RenderNode};
    use crate::registry::Registry;
    use crate::stack::EvaluationStack;
    use crate::subscriber::{Subscriber, SubscriberId, SubscriberRef};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every registry it is asked to depend on.
    #[derive(Default)]
    struct Collector {
        seen: RefCell<Vec<RegistryId>>,
    }

    impl Subscriber for Collector {
        fn id(&self) -> SubscriberId {
            SubscriberId::new(0)
        }
        fn update(&self) -> crate::error::Result<()> {
            Ok(())
        }
        fn add_dependency(&self, registry: &Registry) {
            self.seen.borrow_mut().push(registry.id());
        }
    }

    fn collect(value: &Value) -> Vec<RegistryId> {
        let collector = Rc::new(Collector::default());
        {
            let _guard = EvaluationStack::current().enter(Rc::clone(&collector) as SubscriberRef);
            traverse(value);
        }
        collector.seen.take()
    }

    #[test]
    fn primitives_and_render_nodes_are_leaves() {
        let mut traversal = Traversal::new();
        assert_eq!(traversal.run(&Value::from(1)), 0);
        assert_eq!(traversal.run(&Value::str("s")), 0);

        let hidden = Map::new([("x", Value::from(1))]);
        let node = RenderNode::new("div", Value::Map(hidden.clone()));
        assert_eq!(traversal.run(&Value::RenderNode(node)), 0);
        assert!(collect(&Value::RenderNode(RenderNode::new("p", ()))).is_empty());
    }

    #[test]
    fn frozen_containers_are_skipped() {
        let inner = Map::new([("x", Value::from(1))]);
        let frozen = Value::Map(Map::frozen([("inner", Value::Map(inner))]));
        assert_eq!(Traversal::new().run(&frozen), 0);
        assert!(collect(&frozen).is_empty());
    }

    #[test]
    fn touches_every_nested_field() {
        let leaf = Map::new([("a", Value::from(1)), ("b", Value::from(2))]);
        let list = List::new([Value::Map(leaf.clone())]);
        let root = Map::new([("items", Value::List(list.clone()))]);

        let seen = collect(&Value::Map(root.clone()));
        let expected = [
            root.field("items").unwrap().registry().id(),
            list.registry().unwrap().id(),
            leaf.registry().unwrap().id(),
            leaf.field("a").unwrap().registry().id(),
            leaf.field("b").unwrap().registry().id(),
        ];
        for id in &expected {
            assert!(seen.contains(id), "missing {id:?} in {seen:?}");
        }
    }

    #[test]
    fn self_reference_terminates_and_clears() {
        let map = Map::new([("me", Value::Null)]);
        map.insert("me", Value::Map(map.clone())).unwrap();

        let mut traversal = Traversal::new();
        assert_eq!(traversal.run(&Value::Map(map)), 1);
        assert_eq!(traversal.seen_len(), 0);
    }

    #[test]
    fn multi_hop_cycle_terminates() {
        let a = Map::new([("next", Value::Null)]);
        let b = List::new([Value::Map(a.clone())]);
        let c = Map::new([("next", Value::List(b))]);
        a.insert("next", Value::Map(c)).unwrap();

        let mut traversal = Traversal::new();
        assert_eq!(traversal.run(&Value::Map(a)), 3);
        assert_eq!(traversal.seen_len(), 0);
    }

    #[test]
    fn unobserved_cycles_terminate() {
        let map = {
            let _paused = ObservingPaused::new();
            Map::new([("me", Value::Null)])
        };
        map.insert("me", Value::Map(map.clone())).unwrap();
        assert!(map.registry().is_none());
        assert_eq!(Traversal::new().run(&Value::Map(map)), 1);
    }

    #[test]
    fn shared_substructure_is_entered_once() {
        let shared = Map::new([("x", Value::from(1))]);
        let root = List::new([Value::Map(shared.clone()), Value::Map(shared)]);
        assert_eq!(Traversal::new().run(&Value::List(root)), 2);
    }

    #[test]
    fn very_deep_chain_does_not_overflow() {
        let mut value = Value::from(0);
        for _ in 0..100_000 {
            value = Value::list([value]);
        }
        assert_eq!(Traversal::new().run(&value), 100_000);

        // Dismantle iteratively; dropping the chain in one go recurses too.
        let mut current = value;
        while let Value::List(list) = current {
            current = list.remove(0).unwrap_or(Value::Null);
        }
    }

    #[test]
    fn root_and_list_element_containers_are_depended_on() {
        let elem = Map::new([("a", Value::from(1))]);
        let list = List::new([Value::Map(elem.clone())]);
        let seen = collect(&Value::List(list.clone()));
        assert!(seen.contains(&list.registry().unwrap().id()));
        assert!(seen.contains(&elem.registry().unwrap().id()));
    }

    #[test]
    fn traversing_a_field_value_excludes_the_field_itself() {
        let field = ReactiveField::new(Value::map([("k", Value::from(1))]));
        let seen = collect(&field.peek());
        assert!(!seen.contains(&field.registry().id()));
    }
}
