#![forbid(unsafe_code)]

//! The subscriber contract: re-computable work that depends on registries.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::registry::Registry;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a subscriber. Ordering follows creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next id from the process-wide counter.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of re-computable work.
///
/// Implementors are held behind [`SubscriberRef`]; registries keep only
/// weak references, so the owner of the `Rc` controls the lifetime.
pub trait Subscriber {
    /// Stable id used for deterministic ordering.
    fn id(&self) -> SubscriberId;

    /// Called by [`Registry::notify`] when a dependency changed.
    fn update(&self) -> Result<()>;

    /// Called by [`Registry::depend`] while this subscriber is active.
    ///
    /// Responsible for de-duplication and for the reciprocal
    /// [`Registry::add_subscriber`] call.
    fn add_dependency(&self, registry: &Registry);
}

pub type SubscriberRef = Rc<dyn Subscriber>;

/// Pointer identity for subscriber handles, ignoring vtable metadata.
#[must_use]
pub fn same_subscriber(a: &SubscriberRef, b: &SubscriberRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
