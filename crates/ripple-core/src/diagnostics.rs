#![forbid(unsafe_code)]

//! Process-level reporting for non-fatal warnings and isolated failures.
//!
//! Two thread-local sinks:
//!
//! - the **warn handler** receives [`Diagnostic`]s. [`warn`] only forwards
//!   in diagnostic mode; optimized mode is silent.
//! - the **error handler** receives [`ReactiveError`]s from
//!   [`report_error`], in every mode. `Registry::notify` routes failing
//!   subscribers here so one failure never aborts a notification pass.
//!
//! Both default to `tracing` events and can be replaced by hosts (or tests)
//! that want to capture them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config;
use crate::error::ReactiveError;

/// What a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// An injection request found no provider and declared no default.
    InjectionNotFound,
    /// An injected field was written directly.
    InjectedValueMutated,
    /// Anything else.
    General,
}

/// A non-fatal warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Label of the node or subscriber the warning concerns, if any.
    pub context: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{} (found in {ctx})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

pub type WarnHandler = Rc<dyn Fn(&Diagnostic)>;
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

thread_local! {
    static WARN_HANDLER: RefCell<Option<WarnHandler>> = const { RefCell::new(None) };
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install a warn handler for this thread.
pub fn set_warn_handler(handler: impl Fn(&Diagnostic) + 'static) {
    WARN_HANDLER.with(|cell| *cell.borrow_mut() = Some(Rc::new(handler)));
}

/// Install an error handler for this thread.
pub fn set_error_handler(handler: impl Fn(&ReactiveError) + 'static) {
    ERROR_HANDLER.with(|cell| *cell.borrow_mut() = Some(Rc::new(handler)));
}

/// Restore both handlers to the `tracing` defaults.
pub fn reset_handlers() {
    WARN_HANDLER.with(|cell| *cell.borrow_mut() = None);
    ERROR_HANDLER.with(|cell| *cell.borrow_mut() = None);
}

/// Emit a warning. No-op outside diagnostic mode.
pub fn warn(diagnostic: Diagnostic) {
    if !config::is_diagnostic() {
        return;
    }
    // Clone the handler out so it may itself install a new handler.
    let handler = WARN_HANDLER.with(|cell| cell.borrow().clone());
    match handler {
        Some(handler) => handler(&diagnostic),
        None => tracing::warn!(
            message = "ripple.warn",
            kind = ?diagnostic.kind,
            context = diagnostic.context.as_deref().unwrap_or(""),
            detail = %diagnostic.message,
        ),
    }
}

/// Report an isolated failure. Always delivered, regardless of mode.
pub fn report_error(error: &ReactiveError) {
    let handler = ERROR_HANDLER.with(|cell| cell.borrow().clone());
    match handler {
        Some(handler) => handler(error),
        None => tracing::error!(message = "ripple.error", error = %error),
    }
}

/// Collects everything reported on this thread while alive; restores the
/// default handlers on drop.
#[derive(Debug, Default, Clone)]
pub struct CapturedReports {
    warnings: Rc<RefCell<Vec<Diagnostic>>>,
    errors: Rc<RefCell<Vec<ReactiveError>>>,
}

impl CapturedReports {
    /// Install capturing handlers on this thread.
    #[must_use]
    pub fn install() -> Self {
        let captured = Self::default();
        // Handlers hold weak references so the capture's own handles decide
        // when to reset.
        let warnings = Rc::downgrade(&captured.warnings);
        set_warn_handler(move |d| {
            if let Some(warnings) = warnings.upgrade() {
                warnings.borrow_mut().push(d.clone());
            }
        });
        let errors = Rc::downgrade(&captured.errors);
        set_error_handler(move |e| {
            if let Some(errors) = errors.upgrade() {
                errors.borrow_mut().push(e.clone());
            }
        });
        captured
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.warnings.borrow().clone()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ReactiveError> {
        self.errors.borrow().clone()
    }
}

impl Drop for CapturedReports {
    fn drop(&mut self) {
        // Only the last handle resets; clones share the buffers.
        if Rc::strong_count(&self.warnings) == 1 {
            reset_handlers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReactiveConfig, with_config};
    use crate::subscriber::SubscriberId;
    use tracing_test::traced_test;

    #[test]
    fn warn_is_silent_in_optimized_mode() {
        let captured = CapturedReports::install();
        with_config(ReactiveConfig::optimized(), || {
            warn(Diagnostic::new(DiagnosticKind::General, "hidden"));
        });
        assert!(captured.warnings().is_empty());
    }

    #[test]
    fn warn_reaches_handler_in_diagnostic_mode() {
        let captured = CapturedReports::install();
        with_config(ReactiveConfig::diagnostic_sync(), || {
            warn(Diagnostic::new(DiagnosticKind::General, "shown").with_context("<Root>"));
        });
        let warnings = captured.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].to_string(), "shown (found in <Root>)");
    }

    #[test]
    fn errors_are_reported_in_every_mode() {
        let captured = CapturedReports::install();
        with_config(ReactiveConfig::optimized(), || {
            report_error(&ReactiveError::update_failed(SubscriberId::new(3), "x"));
        });
        assert_eq!(captured.errors().len(), 1);
    }

    #[test]
    fn clones_keep_capturing_until_the_last_is_dropped() {
        let captured = CapturedReports::install();
        let clone = captured.clone();
        drop(captured);
        assert!(ERROR_HANDLER.with(|cell| cell.borrow().is_some()));
        report_error(&ReactiveError::StackUnderflow);
        assert_eq!(clone.errors().len(), 1);
        drop(clone);
        assert!(ERROR_HANDLER.with(|cell| cell.borrow().is_none()));
    }

    #[test]
    fn handlers_reset_when_capture_dropped() {
        {
            let _captured = CapturedReports::install();
        }
        assert!(WARN_HANDLER.with(|cell| cell.borrow().is_none()));
        assert!(ERROR_HANDLER.with(|cell| cell.borrow().is_none()));
    }

    #[traced_test]
    #[test]
    fn default_handlers_emit_tracing_events() {
        reset_handlers();
        with_config(ReactiveConfig::diagnostic_sync(), || {
            warn(Diagnostic::new(
                DiagnosticKind::InjectionNotFound,
                "Injection \"z\" not found",
            ));
        });
        report_error(&ReactiveError::StackUnderflow);
        assert!(logs_contain("ripple.warn"));
        assert!(logs_contain("ripple.error"));
    }
}
