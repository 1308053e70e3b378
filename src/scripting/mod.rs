//! Backend-agnostic script execution for simulation models.
//!
//! A model attaches a short user script to some event, binds host objects
//! into it, and then runs it once per event, often millions of times. This
//! module hides which interpreter actually runs the script behind one
//! contract, enforces a wall-clock budget per run, and captures what the
//! script prints.
//!
//! # Architecture
//!
//! ```text
//! EngineBuilder
//!     ├── backend selector    (available_backends, fallback_chain)
//!     ├── BindingRegistry     (host values + print + scripting_backend)
//!     ├── ScriptBackend trait
//!     │     ├── WrappedBackend   (pluggable registry: QuickJS, Python)
//!     │     ├── PythonBackend    (PyO3, guarded runtime lookups)
//!     │     └── RhaiBackend      (embedded, always present)
//!     └── ScriptEngine        (worker pool, timeout, fast/safe path, OutputSink)
//! ```
//!
//! # Choosing a Backend
//!
//! - **QuickJS**: JavaScript, pre-compiled once, interruptible. Default feature `scripting_js`.
//! - **Python**: requires feature `scripting_python` and an embeddable Python; never interrupted.
//! - **Rhai**: embedded, zero external dependencies, interruptible. Always available.
//!
//! # Example
//!
//! ```rust,no_run
//! use simscript::config::ScriptingConfig;
//! use simscript::scripting::{BackendId, EngineBuilder};
//!
//! let mut config = ScriptingConfig::default();
//! config.backend = BackendId::Rhai.into();
//! config.max_execution_time_ms = 100;
//!
//! let mut engine = EngineBuilder::new(config).bind("limit", 3_i64).build()?;
//! if engine.init_script("print(limit * 2);") {
//!     for _ in 0..1_000 {
//!         engine.run();
//!     }
//! }
//! assert_eq!(engine.result(), "6");
//! # Ok::<(), simscript::error::ScriptError>(())
//! ```
//!
//! # Limitations
//!
//! Cancellation is cooperative. A backend that does not poll its
//! [`CancellationToken`] keeps its worker thread after a timeout until the
//! script finishes on its own.

pub mod backend;
pub mod bindings;
pub mod builder;
pub mod engine;
pub mod output;
pub mod pluggable;
#[cfg(feature = "scripting_python")]
pub mod pyo3_engine;
pub mod rhai_engine;
pub mod script_engine;
pub mod value;

pub use backend::{
    available_backends, best_match, best_match_in, fallback_chain, BackendId, BackendPreference,
};
pub use bindings::{BindingRegistry, BACKEND_BINDING, PRINT_BINDING};
pub use builder::{create_backend, EngineBuilder};
pub use engine::{ExecutionPolicy, ExecutionResult, ScriptEngine};
pub use output::{OutputSink, SharedSink};
pub use pluggable::{EngineManager, PluggableEngine, WrappedBackend, BLOCKED_BINDINGS};
#[cfg(feature = "scripting_python")]
pub use pyo3_engine::PythonBackend;
pub use rhai_engine::RhaiBackend;
pub use script_engine::{CancellationToken, ScriptBackend};
pub use value::{HostCallError, HostObject, HostValue};
