#![forbid(unsafe_code)]

//! Per-field publisher registry.
//!
//! A [`Registry`] instruments one observable field (or one observed
//! container). Reads call [`Registry::depend`], writes call
//! [`Registry::notify`].
//!
//! # Invariants
//!
//! 1. Ids are unique and increase in construction order.
//! 2. The registry itself does not de-duplicate; the active subscriber's
//!    [`Subscriber::add_dependency`] does.
//! 3. `notify()` iterates a snapshot taken before the first `update()`, so
//!    subscribers added or removed during the pass do not affect it.
//! 4. In diagnostic mode with synchronous notification the snapshot is sorted
//!    by subscriber id.
//!
//! # Failure Modes
//!
//! - **`update()` returns `Err` or panics**: reported through
//!   [`diagnostics::report_error`]; the remaining snapshot is still notified.
//! - **Subscriber dropped**: registries hold `Weak` handles; dead entries are
//!   pruned on the next `add_subscriber()` or `notify()`.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config;
use crate::diagnostics;
use crate::error::ReactiveError;
use crate::stack::EvaluationStack;
use crate::subscriber::{Subscriber, SubscriberRef};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique registry identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryId(pub u64);

impl RegistryId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

struct RegistryInner {
    id: RegistryId,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
    stack: EvaluationStack,
}

/// Publisher side of the dependency graph.
///
/// Cloning creates a new handle to the **same** registry.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

impl Registry {
    /// New registry bound to this thread's default evaluation stack.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stack(EvaluationStack::current())
    }

    /// New registry bound to an explicit evaluation stack.
    #[must_use]
    pub fn with_stack(stack: EvaluationStack) -> Self {
        let id = RegistryId(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Rc::new(RegistryInner {
                id,
                subscribers: RefCell::new(Vec::new()),
                stack,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> RegistryId {
        self.inner.id
    }

    /// The stack this registry attributes reads through.
    #[must_use]
    pub fn stack(&self) -> &EvaluationStack {
        &self.inner.stack
    }

    /// Append `sub`, pruning dead entries first. Does not check for
    /// duplicates.
    pub fn add_subscriber(&self, sub: &SubscriberRef) {
        let mut subs = self.inner.subscribers.borrow_mut();
        subs.retain(|w| w.strong_count() > 0);
        subs.push(Rc::downgrade(sub));
    }

    /// Remove the first entry pointing at `sub`; no-op if absent.
    pub fn remove_subscriber(&self, sub: &SubscriberRef) {
        let target = Rc::as_ptr(sub);
        let mut subs = self.inner.subscribers.borrow_mut();
        if let Some(pos) = subs
            .iter()
            .position(|w| std::ptr::addr_eq(w.as_ptr(), target))
        {
            subs.remove(pos);
        }
    }

    /// Whether `sub` is currently recorded.
    #[must_use]
    pub fn has_subscriber(&self, sub: &SubscriberRef) -> bool {
        let target = Rc::as_ptr(sub);
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|w| std::ptr::addr_eq(w.as_ptr(), target))
    }

    /// Number of live subscriber entries (duplicates counted).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Record the active subscriber (if any) as dependent on this registry.
    pub fn depend(&self) {
        if let Some(sub) = self.inner.stack.active() {
            tracing::trace!(
                message = "registry.depend",
                registry = self.id().raw(),
                subscriber = sub.id().raw(),
            );
            sub.add_dependency(self);
        }
    }

    /// Call `update()` on every subscriber recorded at the time of the call.
    ///
    /// Returns how many subscribers were invoked.
    pub fn notify(&self) -> usize {
        let mut snapshot: Vec<SubscriberRef> = {
            let mut subs = self.inner.subscribers.borrow_mut();
            subs.retain(|w| w.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };

        if config::current().sorts_notifications() {
            snapshot.sort_by_key(|sub| sub.id());
        }

        tracing::debug!(
            message = "registry.notify",
            registry = self.id().raw(),
            subscribers = snapshot.len(),
        );

        for sub in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| sub.update())) {
                Ok(Ok(())) => {}
                Ok(Err(err @ ReactiveError::UpdateFailed { .. })) => {
                    diagnostics::report_error(&err);
                }
                Ok(Err(err)) => {
                    diagnostics::report_error(&ReactiveError::update_failed(
                        sub.id(),
                        err.to_string(),
                    ));
                }
                Err(payload) => {
                    diagnostics::report_error(&ReactiveError::from_panic(
                        sub.id(),
                        payload.as_ref(),
                    ));
                }
            }
        }
        snapshot.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.inner.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
