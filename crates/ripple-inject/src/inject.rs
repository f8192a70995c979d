#![forbid(unsafe_code)]

//! Provide/inject resolution and installation.
//!
//! # Lifecycle
//!
//! [`NodeBuilder::build`](crate::NodeBuilder::build) runs [`init_provide`]
//! and then [`init_injections`]. Because the provide step runs first and the
//! lookup starts at the consuming node itself, a node can inject its own
//! provisions.
//!
//! # Failure Modes
//!
//! 1. **Unresolved key, no default**: a diagnostic-mode warning naming the
//!    key; the key is left off the node.
//! 2. **Direct write to an injected field**: a diagnostic-mode warning; the
//!    write still happens.

use indexmap::IndexMap;
use ripple_core::diagnostics::{self, Diagnostic, DiagnosticKind};
use ripple_core::observe::WriteHook;
use ripple_core::{ObservingPaused, ReactiveField, Value, config};
use std::rc::Rc;

use crate::key::Key;
use crate::node::Node;
use crate::request::Injections;

/// Compute and attach `node`'s provider record. No-op without a provide
/// declaration.
pub fn init_provide(node: &Node) {
    let Some(provide) = node.provide_declaration() else {
        return;
    };
    let record = provide.materialize(node);
    tracing::debug!(
        message = "inject.provide",
        node = node.id().raw(),
        keys = record.len(),
    );
    node.attach_provided(record);
}

/// Resolve every request in `injections` against `node`'s lineage.
///
/// Keys that resolve neither from a provider nor from a default are absent
/// from the result.
#[must_use]
pub fn resolve_inject(injections: &Injections, node: &Node) -> IndexMap<Key, Value> {
    let mut resolved = IndexMap::with_capacity(injections.len());
    for (local, request) in injections.iter() {
        if local.is_reserved() {
            continue;
        }
        let provided = node
            .lineage()
            .find_map(|ancestor| ancestor.provided_value(&request.from));
        match (provided, &request.default) {
            (Some(value), _) => {
                resolved.insert(local.clone(), value);
            }
            (None, Some(default)) => {
                resolved.insert(local.clone(), default.produce(node));
            }
            (None, None) => {
                diagnostics::warn(
                    Diagnostic::new(
                        DiagnosticKind::InjectionNotFound,
                        format!("Injection \"{local}\" not found"),
                    )
                    .with_context(node.describe()),
                );
            }
        }
    }
    tracing::trace!(
        message = "inject.resolve",
        node = node.id().raw(),
        requested = injections.len(),
        resolved = resolved.len(),
    );
    resolved
}

/// Resolve `node`'s inject declaration and install the results as reactive
/// fields. No-op without a declaration.
pub fn init_injections(node: &Node) {
    let Some(injections) = node.inject_declaration() else {
        return;
    };
    let resolved = resolve_inject(injections, node);
    if resolved.is_empty() {
        return;
    }

    let guard_writes = config::is_diagnostic();
    let _paused = ObservingPaused::new();
    for (key, value) in resolved {
        let field = if guard_writes {
            ReactiveField::with_write_hook(value, mutation_warning(&key, node.describe()))
        } else {
            ReactiveField::new(value)
        };
        node.define_field(key, field);
    }
}

fn mutation_warning(key: &Key, context: String) -> WriteHook {
    let message = format!(
        "Avoid mutating an injected value directly since the changes will be \
         overwritten whenever the provided component re-renders. \
         injection being mutated: \"{key}\""
    );
    Rc::new(move |_: &Value| {
        diagnostics::warn(
            Diagnostic::new(DiagnosticKind::InjectedValueMutated, message.clone())
                .with_context(context.clone()),
        );
    })
}
