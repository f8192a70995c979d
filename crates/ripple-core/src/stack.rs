#![forbid(unsafe_code)]

//! The evaluation stack: which subscriber is currently running.
//!
//! Every tracked read is attributed to the top of this stack. Nested
//! evaluations (a lazy watcher evaluated while another watcher runs) push on
//! top and pop back, restoring the enclosing subscriber.
//!
//! # Invariants
//!
//! 1. At most one subscriber is active at any instant: the top entry.
//! 2. Push and pop are strictly paired and LIFO. [`ActiveGuard`] pops
//!    exactly once on drop, including while unwinding, and never below the
//!    depth it was created at.
//! 3. A `None` entry means "running, but not tracking" (see
//!    [`EvaluationStack::untracked`]).
//!
//! Each thread owns a default stack ([`EvaluationStack::current`]) that is
//! valid for the thread's lifetime. Registries bind to a stack handle at
//! construction, so independent graphs can use their own stacks.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::subscriber::SubscriberRef;

thread_local! {
    static DEFAULT_STACK: EvaluationStack = EvaluationStack::new();
}

/// Shared handle to a stack of active subscribers.
///
/// Cloning creates a new handle to the **same** stack.
#[derive(Clone, Default)]
pub struct EvaluationStack {
    entries: Rc<RefCell<Vec<Option<SubscriberRef>>>>,
}

impl EvaluationStack {
    /// Create an empty, independent stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// This thread's default stack.
    #[must_use]
    pub fn current() -> Self {
        DEFAULT_STACK.with(Clone::clone)
    }

    /// Push `sub` (or a non-tracking `None`) and make it active.
    pub fn push_active(&self, sub: Option<SubscriberRef>) {
        tracing::trace!(
            message = "stack.push",
            subscriber = sub.as_ref().map(|s| s.id().raw()),
            depth = self.depth() + 1,
        );
        self.entries.borrow_mut().push(sub);
    }

    /// Pop the top entry; the new top (if any) becomes active.
    pub fn pop_active(&self) -> Result<Option<SubscriberRef>> {
        let popped = self.entries.borrow_mut().pop();
        match popped {
            Some(entry) => {
                tracing::trace!(message = "stack.pop", depth = self.depth());
                Ok(entry)
            }
            None => Err(ReactiveError::StackUnderflow),
        }
    }

    /// The subscriber reads are currently attributed to.
    #[must_use]
    pub fn active(&self) -> Option<SubscriberRef> {
        self.entries.borrow().last().cloned().flatten()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether reads would currently be attributed to someone.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.entries.borrow().last().is_some_and(Option::is_some)
    }

    /// Push `sub` and return a guard that pops it on drop.
    #[must_use = "dropping the guard immediately pops the subscriber"]
    pub fn enter(&self, sub: SubscriberRef) -> ActiveGuard {
        self.push_active(Some(sub));
        ActiveGuard {
            stack: self.clone(),
            depth: self.depth(),
        }
    }

    /// Push a non-tracking entry and return a guard that pops it on drop.
    #[must_use = "dropping the guard immediately pops the entry"]
    pub fn enter_untracked(&self) -> ActiveGuard {
        self.push_active(None);
        ActiveGuard {
            stack: self.clone(),
            depth: self.depth(),
        }
    }

    /// Run `f` with dependency collection suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter_untracked();
        f()
    }

    /// Whether two handles refer to the same stack.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for EvaluationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationStack")
            .field("depth", &self.depth())
            .field("active", &self.active().map(|s| s.id()))
            .finish()
    }
}

/// RAII guard returned by [`EvaluationStack::enter`].
pub struct ActiveGuard {
    stack: EvaluationStack,
    depth: usize,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let depth = self.stack.depth();
        if depth != self.depth {
            tracing::error!(
                message = "stack.unbalanced",
                expected = self.depth,
                actual = depth,
            );
        }
        // Our entry is already gone: leave the enclosing entries alone.
        if depth < self.depth {
            return;
        }
        // Unpaired pushes above our entry go with it.
        let popped = self.stack.entries.borrow_mut().split_off(self.depth - 1);
        drop(popped);
        tracing::trace!(message = "stack.pop", depth = self.depth - 1);
    }
}

impl fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveGuard")
            .field("depth", &self.depth)
            .finish()
    }
}

/// Push onto this thread's default stack.
pub fn push_active(sub: Option<SubscriberRef>) {
    EvaluationStack::current().push_active(sub);
}

/// Pop this thread's default stack.
pub fn pop_active() -> Result<Option<SubscriberRef>> {
    EvaluationStack::current().pop_active()
}

/// Active subscriber on this thread's default stack.
#[must_use]
pub fn active_subscriber() -> Option<SubscriberRef> {
    EvaluationStack::current().active()
}

/// Run `f` on this thread's default stack without tracking reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    EvaluationStack::current().untracked(f)
}
