//! Backend adapter contract shared by every scripting runtime.
//!
//! This module defines the `ScriptBackend` trait that every interchangeable
//! runtime implements. The execution engine and the binding registry only ever
//! talk to this trait, so a runtime can be added, deprecated or compiled out
//! without touching either of them.
//!
//! # Architecture
//!
//! The trait is built around three operations, always called in this order:
//! 1. **`init_engine`** - create the runtime, inject bindings and `print`, sandbox
//! 2. **`init_script`** - load (and where possible pre-compile) the user source once
//! 3. **`execute`** - run the loaded script; called arbitrarily many times
//!
//! # Cancellation
//!
//! `execute` receives a [`CancellationToken`]. Polling it is cooperative: a
//! backend that checks it (Rhai's progress callback, QuickJS's interrupt
//! handler) stops soon after a timeout; one that does not (Python) keeps
//! running detached until the script ends on its own. Nothing here promises
//! termination.
//!
//! # Implementation Guide
//!
//! To add a backend:
//!
//! 1. Add a variant to [`crate::scripting::BackendId`] with its availability predicate
//! 2. Implement `ScriptBackend`, converting runtime errors into [`crate::error::ScriptError`]
//! 3. Route `print` to the [`SharedSink`] and project [`crate::scripting::HostValue`]s into the runtime
//! 4. Wire construction into `EngineBuilder`
//!
//! See `RhaiBackend` for a reference implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ScriptResult;
use crate::scripting::backend::BackendId;
use crate::scripting::bindings::BindingRegistry;
use crate::scripting::output::SharedSink;

// =============================================================================
// Cancellation
// =============================================================================

/// Thread-safe cancellation flag handed to [`ScriptBackend::execute`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// ScriptBackend Trait
// =============================================================================

/// Generic interface for scripting backends.
///
/// # Thread Safety
///
/// Implementations must be `Send`: the engine moves execution onto pool
/// workers. Calls are serialized by the engine; a backend never sees two
/// concurrent `execute` calls.
pub trait ScriptBackend: Send {
    /// Which backend this is.
    fn id(&self) -> BackendId;

    /// Create the runtime and inject `bindings`, the diagnostic backend binding
    /// and a `print` function writing to `sink`.
    ///
    /// # Errors
    ///
    /// Any failure here means the backend is unusable on this host; the
    /// builder moves on to the next backend in the fallback chain.
    fn init_engine(&mut self, bindings: &BindingRegistry, sink: SharedSink) -> ScriptResult<()>;

    /// Load `source`, replacing any previously loaded script.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ScriptError::Compile`] when the source does not parse. A
    /// backend may defer reporting to the next [`execute`](Self::execute)
    /// instead; Rhai does.
    fn init_script(&mut self, source: &str) -> ScriptResult<()>;

    /// Run the loaded script once.
    ///
    /// # Errors
    ///
    /// [`crate::error::ScriptError::Runtime`] for uncaught script faults,
    /// [`crate::error::ScriptError::Cancelled`] when the backend honoured `cancel`.
    fn execute(&mut self, cancel: &CancellationToken) -> ScriptResult<()>;
}
