//! Custom error types for the scripting core.
//!
//! This module defines the primary error type, `ScriptError`, shared by every
//! backend adapter, the execution engine and the engine builder. Using the
//! `thiserror` crate, it gives a single vocabulary for failures that originate
//! in very different scripting runtimes.
//!
//! ## Error Hierarchy
//!
//! - **`BackendUnavailable`**: no configured or fallback backend could be constructed.
//!   Only ever surfaced by the engine builder, never by `run()`.
//! - **`Backend`**: a runtime-specific setup failure (missing symbol, context creation).
//! - **`Compile`**: the script source failed to parse or compile.
//! - **`Runtime`**: an exception escaped the script while it was executing.
//! - **`Timeout`** / **`Cancelled`**: the wall-clock budget elapsed, or the backend
//!   observed the cancellation token and stopped on its own.
//! - **`Binding`**: a host object could not be projected into the script namespace.
//! - **`Config`**: configuration loading or validation failed.
//! - **`Io`**: thread pool or file I/O failure.
//!
//! Nothing in here ever escapes `ScriptEngine::run()`; the engine folds every
//! variant into a boolean flag plus a message (see `crate::scripting::engine`).

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the scripting error type.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Errors that can occur while building engines or running scripts.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// No backend in the fallback chain could be constructed.
    #[error("No scripting backend available (requested: {requested})")]
    BackendUnavailable {
        /// The preference that was being resolved.
        requested: String,
    },

    /// Backend-specific setup error.
    #[error("{backend} backend error: {message}")]
    Backend {
        /// Display name of the backend.
        backend: String,
        /// Underlying runtime message.
        message: String,
    },

    /// Compilation or parsing error.
    #[error("Compilation error: {message}")]
    Compile {
        /// Diagnostic produced by the runtime.
        message: String,
    },

    /// Uncaught fault while the script was running.
    #[error("Runtime error: {message}")]
    Runtime {
        /// Diagnostic produced by the runtime.
        message: String,
    },

    /// The wall-clock budget elapsed before the script finished.
    #[error("Script exceeded its time budget of {budget_ms} ms")]
    Timeout {
        /// Budget that was exceeded.
        budget_ms: u64,
    },

    /// The backend honoured a cancellation request.
    #[error("Script was cancelled")]
    Cancelled,

    /// A host binding could not be installed.
    #[error("Binding '{name}' could not be installed: {message}")]
    Binding {
        /// Name of the binding.
        name: String,
        /// Reason reported by the backend.
        message: String,
    },

    /// Configuration loading or validation failure.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error, including worker pool construction.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    /// Shorthand for a backend setup error.
    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        ScriptError::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a runtime error.
    pub fn runtime(message: impl ToString) -> Self {
        ScriptError::Runtime {
            message: message.to_string(),
        }
    }

    /// Shorthand for a compilation error.
    pub fn compile(message: impl ToString) -> Self {
        ScriptError::Compile {
            message: message.to_string(),
        }
    }

    /// The bare diagnostic without the category prefix, as written to the output sink.
    pub fn message(&self) -> String {
        match self {
            ScriptError::Compile { message } | ScriptError::Runtime { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
