//! Pluggable engine registry and the wrapped-standard-API backend adapter.
//!
//! Some runtimes are reached through a generic, engine-neutral interface
//! instead of their native API: engines are obtained by name from an
//! [`EngineManager`], fed bindings through `put`, and run either from a
//! pre-compiled artifact (when the engine can compile) or by re-evaluating
//! the raw source on every call.
//!
//! ```text
//! EngineManager ("javascript", "python", ...)
//!        │ engine_by_name
//!        ▼
//! Box<dyn PluggableEngine> ──► WrappedBackend (ScriptBackend)
//!                                 ├── put bindings + print
//!                                 ├── sandbox: remove blocked names
//!                                 └── compile once, or re-eval source
//! ```
//!
//! # Sandboxing
//!
//! After all bindings are injected, [`WrappedBackend`] removes every name in
//! [`BLOCKED_BINDINGS`] plus the engine's own escape hatches. The list is
//! applied unconditionally; a host binding that collides with it is dropped
//! with a warning.

#[cfg(feature = "scripting_python")]
pub mod python;
#[cfg(feature = "scripting_js")]
pub mod quickjs;

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{ScriptError, ScriptResult};
use crate::scripting::backend::BackendId;
use crate::scripting::bindings::BindingRegistry;
use crate::scripting::output::SharedSink;
use crate::scripting::script_engine::{CancellationToken, ScriptBackend};
use crate::scripting::value::HostValue;

/// Registry name of the QuickJS engine.
pub const JAVASCRIPT_ENGINE: &str = "javascript";

/// Registry name of the Python engine.
pub const PYTHON_ENGINE: &str = "python";

/// Names removed from every wrapped engine: namespaces reaching host
/// reflection, files, network or processes, plus generic code-loading hooks.
pub const BLOCKED_BINDINGS: &[&str] = &[
    "os",
    "std",
    "sys",
    "io",
    "process",
    "require",
    "import",
    "load",
    "loadWithNewGlobal",
    "exit",
    "quit",
    "readFully",
    "readLine",
    "eval",
];

// =============================================================================
// PluggableEngine Trait
// =============================================================================

/// Opaque handle to a script pre-compiled by a [`PluggableEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    id: u64,
}

impl CompiledScript {
    /// Issued by engines; only meaningful to the engine that issued it.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Engine-specific identifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Engine-neutral scripting interface used by [`WrappedBackend`].
pub trait PluggableEngine: Send {
    /// Registry name of this engine.
    fn engine_name(&self) -> &'static str;

    /// Define a global binding.
    fn put(&mut self, name: &str, value: &HostValue) -> ScriptResult<()>;

    /// Define `print` so that it writes to `sink`.
    fn install_print(&mut self, sink: SharedSink) -> ScriptResult<()>;

    /// Remove a global binding. Removing an undefined name is not an error.
    fn remove(&mut self, name: &str) -> ScriptResult<()>;

    /// Whether a script would resolve `name` to something defined.
    fn is_defined(&mut self, name: &str) -> ScriptResult<bool>;

    /// Engine-specific names to strip in addition to [`BLOCKED_BINDINGS`].
    fn escape_hatches(&self) -> &'static [&'static str] {
        &[]
    }

    /// Pre-compile `source`. `Ok(None)` means the engine cannot pre-compile
    /// and the caller should [`eval`](Self::eval) the source each time.
    fn compile(&mut self, _source: &str) -> ScriptResult<Option<CompiledScript>> {
        Ok(None)
    }

    /// Evaluate raw source.
    fn eval(&mut self, source: &str, cancel: &CancellationToken) -> ScriptResult<()>;

    /// Evaluate a script returned by [`compile`](Self::compile).
    fn eval_compiled(
        &mut self,
        script: &CompiledScript,
        _cancel: &CancellationToken,
    ) -> ScriptResult<()> {
        Err(ScriptError::backend(
            self.engine_name(),
            format!("compiled script {} not supported", script.id()),
        ))
    }
}

// =============================================================================
// Engine Manager
// =============================================================================

/// Constructor registered under an engine name.
pub type EngineFactory = fn() -> ScriptResult<Box<dyn PluggableEngine>>;

/// Name-indexed registry of pluggable engines.
#[derive(Clone, Default)]
pub struct EngineManager {
    factories: BTreeMap<&'static str, EngineFactory>,
}

impl EngineManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every engine compiled into this build.
    pub fn with_builtin_engines() -> Self {
        #[allow(unused_mut)]
        let mut manager = Self::new();
        #[cfg(feature = "scripting_js")]
        manager.register(JAVASCRIPT_ENGINE, quickjs::QuickJsEngine::boxed);
        #[cfg(feature = "scripting_python")]
        manager.register(PYTHON_ENGINE, python::PythonEngine::boxed);
        manager
    }

    /// Register `factory` under `name`, replacing an existing entry.
    pub fn register(&mut self, name: &'static str, factory: EngineFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered engine names.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Construct the engine registered as `name`; `None` if nothing is.
    pub fn engine_by_name(&self, name: &str) -> Option<ScriptResult<Box<dyn PluggableEngine>>> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineManager")
            .field("engines", &self.names())
            .finish()
    }
}

// =============================================================================
// WrappedBackend
// =============================================================================

enum Loaded {
    Compiled(CompiledScript),
    Source(String),
}

/// ScriptBackend adapter over a named [`PluggableEngine`].
pub struct WrappedBackend {
    id: BackendId,
    engine_name: &'static str,
    manager: EngineManager,
    engine: Option<Box<dyn PluggableEngine>>,
    loaded: Option<Loaded>,
}

impl WrappedBackend {
    /// Adapter for `id` backed by the built-in engine named `engine_name`.
    pub fn new(id: BackendId, engine_name: &'static str) -> Self {
        Self::with_manager(id, engine_name, EngineManager::with_builtin_engines())
    }

    /// Adapter resolving `engine_name` from a custom registry.
    pub fn with_manager(id: BackendId, engine_name: &'static str, manager: EngineManager) -> Self {
        Self {
            id,
            engine_name,
            manager,
            engine: None,
            loaded: None,
        }
    }

    /// Whether the last `init_script` produced a pre-compiled artifact.
    pub fn is_precompiled(&self) -> bool {
        matches!(self.loaded, Some(Loaded::Compiled(_)))
    }

    /// Whether `name` resolves inside the wrapped engine.
    pub fn is_defined(&mut self, name: &str) -> ScriptResult<bool> {
        self.engine_mut()?.is_defined(name)
    }

    fn engine_mut(&mut self) -> ScriptResult<&mut Box<dyn PluggableEngine>> {
        let backend = self.id.name();
        self.engine
            .as_mut()
            .ok_or_else(|| ScriptError::backend(backend, "engine not initialised"))
    }
}

/// Every name the sandbox strips from `engine`.
pub fn sandboxed_names(engine: &dyn PluggableEngine) -> Vec<&'static str> {
    BLOCKED_BINDINGS
        .iter()
        .chain(engine.escape_hatches())
        .copied()
        .collect()
}

fn apply_sandbox(engine: &mut dyn PluggableEngine, bindings: &BindingRegistry) -> ScriptResult<()> {
    let names = sandboxed_names(engine);
    for name in &names {
        if bindings.contains(name) {
            warn!(binding = %name, engine = engine.engine_name(), "Host binding removed by sandbox");
        }
        engine.remove(name)?;
    }
    debug!(removed = names.len(), engine = engine.engine_name(), "Sandbox applied");
    Ok(())
}

impl ScriptBackend for WrappedBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn init_engine(&mut self, bindings: &BindingRegistry, sink: SharedSink) -> ScriptResult<()> {
        let mut engine = self
            .manager
            .engine_by_name(self.engine_name)
            .ok_or_else(|| {
                ScriptError::backend(
                    self.id.name(),
                    format!("no engine registered as '{}'", self.engine_name),
                )
            })??;

        for (name, value) in bindings.resolved_for(self.id) {
            engine.put(&name, &value).map_err(|e| ScriptError::Binding {
                name: name.clone(),
                message: e.message(),
            })?;
        }
        engine.install_print(sink)?;
        apply_sandbox(engine.as_mut(), bindings)?;

        self.engine = Some(engine);
        self.loaded = None;
        Ok(())
    }

    fn init_script(&mut self, source: &str) -> ScriptResult<()> {
        let engine = self.engine_mut()?;
        let compiled = engine.compile(source);
        self.loaded = match compiled {
            Ok(Some(script)) => Some(Loaded::Compiled(script)),
            Ok(None) => {
                debug!(engine = self.engine_name, "Engine cannot pre-compile; re-evaluating source per run");
                Some(Loaded::Source(source.to_string()))
            }
            Err(e) => {
                self.loaded = None;
                return Err(e);
            }
        };
        Ok(())
    }

    fn execute(&mut self, cancel: &CancellationToken) -> ScriptResult<()> {
        let backend = self.id.name();
        let (Some(engine), Some(loaded)) = (self.engine.as_mut(), self.loaded.as_ref()) else {
            return Err(ScriptError::backend(backend, "no script loaded"));
        };
        match loaded {
            Loaded::Compiled(script) => engine.eval_compiled(script, cancel),
            Loaded::Source(source) => engine.eval(source, cancel),
        }
    }
}
