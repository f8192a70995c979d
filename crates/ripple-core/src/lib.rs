#![forbid(unsafe_code)]

//! Core: publisher registries, the evaluation stack, deep traversal, and the
//! minimal value/field layer they instrument.
//!
//! # Architecture
//!
//! A [`Registry`] lives next to every observable field. Reading the field
//! calls [`Registry::depend`], which attributes the read to whichever
//! [`Subscriber`] is on top of the [`EvaluationStack`]. Writing calls
//! [`Registry::notify`], which re-runs every recorded subscriber from a
//! snapshot.
//!
//! Everything is single-threaded: handles are `Rc`-based and all ambient
//! state (default stack, config, diagnostics handlers, observation toggle) is
//! thread-local.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod observe;
pub mod registry;
pub mod stack;
pub mod subscriber;
pub mod traverse;
pub mod watcher;

pub use config::{Mode, ReactiveConfig};
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use error::{ReactiveError, Result};
pub use observe::{List, Map, ObservedContainer, ObservingPaused, ReactiveField, RenderNode, Value};
pub use registry::{Registry, RegistryId};
pub use stack::{ActiveGuard, EvaluationStack, active_subscriber, pop_active, push_active, untracked};
pub use subscriber::{Subscriber, SubscriberId, SubscriberRef};
pub use traverse::{Traversal, traverse};
pub use watcher::{Scheduler, Watcher, WatcherOptions};
