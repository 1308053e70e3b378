//! Message catalog lookups for user-facing strings.
//!
//! The scripting core never formats user-facing language itself. Every
//! message it produces goes through a [`MessageCatalog`] keyed by a symbolic
//! [`MessageId`]; hosts plug in their localized catalog through the engine
//! builder. [`DefaultCatalog`] is the English fallback.

use std::fmt;

/// Symbolic identifiers for every user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// The safe-path budget elapsed. Args: budget in milliseconds.
    ExecutionTimeout,
    /// `run()` was called without a successfully loaded script.
    NoScriptLoaded,
    /// A backend could not be constructed. Args: backend name.
    EngineUnavailable,
    /// `init_script()` failed. Args: diagnostic.
    CompileFailed,
    /// A run ended with an uncaught fault. Args: diagnostic.
    ExecutionFailed,
    /// The worker disappeared without reporting a result.
    WorkerLost,
    /// A timed-out run still holds the backend.
    EngineBusy,
}

impl MessageId {
    /// Stable key for catalog files.
    pub fn key(self) -> &'static str {
        match self {
            MessageId::ExecutionTimeout => "script.timeout",
            MessageId::NoScriptLoaded => "script.no_script",
            MessageId::EngineUnavailable => "script.engine_unavailable",
            MessageId::CompileFailed => "script.compile_failed",
            MessageId::ExecutionFailed => "script.execution_failed",
            MessageId::WorkerLost => "script.worker_lost",
            MessageId::EngineBusy => "script.engine_busy",
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Source of localized message text.
pub trait MessageCatalog: Send + Sync {
    /// Resolve `id`, substituting `args` positionally.
    fn message(&self, id: MessageId, args: &[&str]) -> String;
}

/// English fallback catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCatalog;

impl MessageCatalog for DefaultCatalog {
    fn message(&self, id: MessageId, args: &[&str]) -> String {
        let arg = |i: usize| args.get(i).copied().unwrap_or("?");
        match id {
            MessageId::ExecutionTimeout => {
                format!("Maximum script run time exceeded ({} ms).", arg(0))
            }
            MessageId::NoScriptLoaded => "No script loaded.".to_string(),
            MessageId::EngineUnavailable => format!("Script engine unavailable: {}", arg(0)),
            MessageId::CompileFailed => format!("Script could not be compiled: {}", arg(0)),
            MessageId::ExecutionFailed => format!("Script execution failed: {}", arg(0)),
            MessageId::WorkerLost => "Script worker terminated without a result.".to_string(),
            MessageId::EngineBusy => {
                "Script engine is still busy with a timed-out run.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_substitutes_args() {
        let text = DefaultCatalog.message(MessageId::ExecutionTimeout, &["100"]);
        assert!(text.contains("100 ms"));

        let text = DefaultCatalog.message(MessageId::EngineUnavailable, &["Python"]);
        assert!(text.ends_with("Python"));
    }

    #[test]
    fn test_missing_args_do_not_panic() {
        let text = DefaultCatalog.message(MessageId::CompileFailed, &[]);
        assert!(text.contains('?'));
    }

    #[test]
    fn test_keys_are_unique() {
        let ids = [
            MessageId::ExecutionTimeout,
            MessageId::NoScriptLoaded,
            MessageId::EngineUnavailable,
            MessageId::CompileFailed,
            MessageId::ExecutionFailed,
            MessageId::WorkerLost,
            MessageId::EngineBusy,
        ];
        let keys: std::collections::HashSet<_> = ids.iter().map(|id| id.key()).collect();
        assert_eq!(keys.len(), ids.len());
    }
}
