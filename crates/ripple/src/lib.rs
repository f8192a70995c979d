#![forbid(unsafe_code)]

//! Ripple public facade crate.
//!
//! Re-exports the dependency engine and provide/inject under one name.

pub use ripple_core::{
    EvaluationStack, List, Map, Mode, ReactiveConfig, ReactiveError, ReactiveField, Registry,
    RenderNode, Result, Subscriber, SubscriberId, Traversal, Value, Watcher, WatcherOptions,
    traverse,
};
pub use ripple_core::watcher::callback;
pub use ripple_inject::{InjectRequest, Injections, Key, Node, Provide, Token};

pub mod prelude {
    pub use ripple_core as core;
    pub use ripple_inject as inject;

    pub use ripple_core::{ReactiveField, Value, Watcher, WatcherOptions};
    pub use ripple_inject::{InjectRequest, Injections, Node, Provide};
}
