#![forbid(unsafe_code)]

//! Runtime configuration: diagnostic vs optimized mode and notification style.
//!
//! The active [`ReactiveConfig`] is thread-local. It starts from
//! [`ReactiveConfig::from_env()`] and can be replaced with [`set`] or
//! temporarily overridden with [`with_config`].
//!
//! # Environment
//!
//! [`ReactiveConfig::from_env`] layers these variables over the defaults:
//!
//! | Variable      | Values                                   |
//! |---------------|------------------------------------------|
//! | `RIPPLE_MODE` | `diagnostic`, `debug`, `optimized`, `production` |
//! | `RIPPLE_SYNC` | `1`/`true` selects synchronous notification |
//!
//! Unparsable values are ignored.

use std::cell::Cell;
use std::env;

/// Build/runtime mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Warnings on missing or mutated injections, deterministic notify order.
    Diagnostic,
    /// No warnings, no debug sort.
    Optimized,
}

impl Mode {
    /// Parse a mode name (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "diagnostic" | "debug" | "development" => Some(Self::Diagnostic),
            "optimized" | "production" | "release" => Some(Self::Optimized),
            _ => None,
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Diagnostic
        } else {
            Self::Optimized
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactiveConfig {
    /// Diagnostic or optimized behavior.
    pub mode: Mode,
    /// Whether an external scheduler batches and orders re-evaluation.
    /// When false, notification is fully synchronous.
    pub async_notify: bool,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            async_notify: true,
        }
    }
}

impl ReactiveConfig {
    /// Diagnostic mode with synchronous notification.
    #[must_use]
    pub fn diagnostic_sync() -> Self {
        Self {
            mode: Mode::Diagnostic,
            async_notify: false,
        }
    }

    /// Optimized mode with default notification style.
    #[must_use]
    pub fn optimized() -> Self {
        Self {
            mode: Mode::Optimized,
            ..Self::default()
        }
    }

    /// Defaults overridden by `RIPPLE_MODE` / `RIPPLE_SYNC`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = env::var("RIPPLE_MODE")
            && let Some(mode) = Mode::parse(&val)
        {
            config.mode = mode;
        }
        if let Ok(val) = env::var("RIPPLE_SYNC") {
            let sync = val == "1" || val.eq_ignore_ascii_case("true");
            config.async_notify = !sync;
        }
        config
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_async_notify(mut self, enabled: bool) -> Self {
        self.async_notify = enabled;
        self
    }

    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        self.mode == Mode::Diagnostic
    }

    /// Whether `notify()` sorts its snapshot by subscriber id.
    #[must_use]
    pub fn sorts_notifications(&self) -> bool {
        self.is_diagnostic() && !self.async_notify
    }
}

thread_local! {
    static CURRENT: Cell<ReactiveConfig> = Cell::new(ReactiveConfig::from_env());
}

/// The configuration active on this thread.
#[must_use]
pub fn current() -> ReactiveConfig {
    CURRENT.with(Cell::get)
}

/// Replace this thread's configuration.
pub fn set(config: ReactiveConfig) {
    CURRENT.with(|cell| cell.set(config));
}

/// Whether this thread runs in diagnostic mode.
#[must_use]
pub fn is_diagnostic() -> bool {
    current().is_diagnostic()
}

/// Run `f` with `config` active, restoring the previous configuration
/// afterwards (also when `f` panics).
pub fn with_config<R>(config: ReactiveConfig, f: impl FnOnce() -> R) -> R {
    struct Restore(ReactiveConfig);
    impl Drop for Restore {
        fn drop(&mut self) {
            set(self.0);
        }
    }

    let _restore = Restore(current());
    set(config);
    f()
}
