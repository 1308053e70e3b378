//! Rhai implementation of the ScriptBackend trait
//!
//! This is the direct-embedded-interpreter backend. Rhai is compiled into the
//! crate unconditionally, so this backend is always available and closes the
//! fallback chain.
//!
//! # Sandboxing
//!
//! The safe global environment is built at engine creation instead of being
//! stripped afterwards:
//!
//! - module imports resolve against a dummy resolver (no file access)
//! - the `eval` symbol is disabled
//! - call depth, expression depth and string/array/map sizes are bounded
//!
//! Scripts only ever reach the host through registered bindings.
//!
//! # Host Objects
//!
//! Host objects appear as the `HostObject` type:
//!
//! ```text
//! clock.invoke("now")             // method without arguments
//! clock.invoke("advance", [5.0])  // method with arguments
//! clock["time"]                   // property read
//! clock.type_name()               // host type name
//! ```
//!
//! # Compile Errors
//!
//! `init_script` never fails for this backend. A parse error is kept and
//! raised by every following `execute` until a valid script is loaded.

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope, AST};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};
use crate::scripting::backend::BackendId;
use crate::scripting::bindings::BindingRegistry;
use crate::scripting::output::SharedSink;
use crate::scripting::script_engine::{CancellationToken, ScriptBackend};
use crate::scripting::value::{HostObject, HostValue};

/// Operations between two cancellation polls.
const CANCEL_POLL_INTERVAL: u64 = 256;

/// Token returned from the progress callback when a run is cancelled.
const CANCELLED_TOKEN: &str = "script cancelled";

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 10_000_000;
const MAX_ARRAY_SIZE: usize = 1_000_000;
const MAX_MAP_SIZE: usize = 100_000;

// =============================================================================
// Host object handle
// =============================================================================

/// Rhai-side handle to a shared host object.
#[derive(Debug, Clone)]
pub struct HostHandle(pub Arc<dyn HostObject>);

impl HostHandle {
    fn invoke(&mut self, method: &str, args: Array) -> Result<Dynamic, Box<EvalAltResult>> {
        let args: Vec<HostValue> = args.into_iter().map(from_dynamic).collect();
        self.0
            .call(method, &args)
            .map(|value| to_dynamic(&value))
            .map_err(|e| e.to_string().into())
    }

    fn property(&mut self, name: ImmutableString) -> Result<Dynamic, Box<EvalAltResult>> {
        match self.0.get(&name) {
            Some(value) => Ok(to_dynamic(&value)),
            None => Err(EvalAltResult::ErrorPropertyNotFound(name.to_string(), Position::NONE).into()),
        }
    }
}

/// Convert a host value into a Rhai value.
pub fn to_dynamic(value: &HostValue) -> Dynamic {
    match value {
        HostValue::Unit => Dynamic::UNIT,
        HostValue::Bool(b) => Dynamic::from_bool(*b),
        HostValue::Int(i) => Dynamic::from_int(*i),
        HostValue::Float(f) => Dynamic::from_float(*f),
        HostValue::Str(s) => Dynamic::from(s.clone()),
        HostValue::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        HostValue::Object(obj) => Dynamic::from(HostHandle(obj.clone())),
    }
}

/// Convert a Rhai value back into a host value.
///
/// Types without a host counterpart (maps, closures) are passed as their
/// string form.
pub fn from_dynamic(value: Dynamic) -> HostValue {
    if value.is_unit() {
        return HostValue::Unit;
    }
    if let Ok(b) = value.as_bool() {
        return HostValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return HostValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return HostValue::Float(f);
    }
    if value.is::<HostHandle>() {
        if let Some(handle) = value.try_cast::<HostHandle>() {
            return HostValue::Object(handle.0);
        }
        return HostValue::Unit;
    }
    if value.is_string() {
        return match value.into_string() {
            Ok(s) => HostValue::Str(s),
            Err(type_name) => HostValue::Str(type_name.to_string()),
        };
    }
    if value.is_array() {
        return match value.into_array() {
            Ok(items) => HostValue::List(items.into_iter().map(from_dynamic).collect()),
            Err(type_name) => HostValue::Str(type_name.to_string()),
        };
    }
    HostValue::Str(value.to_string())
}

// =============================================================================
// RhaiBackend Implementation
// =============================================================================

/// Rhai-based implementation of ScriptBackend
///
/// Host bindings live as constants at the bottom of a persistent scope. Each
/// run rewinds the scope to that base, so variables a script declares never
/// leak into the next run.
pub struct RhaiBackend {
    engine: Option<Engine>,
    scope: Scope<'static>,
    base_scope_len: usize,
    ast: Option<AST>,
    pending_error: Option<String>,
    cancel_slot: Arc<RwLock<CancellationToken>>,
}

impl RhaiBackend {
    /// Create an uninitialised backend; call `init_engine` before use.
    pub fn new() -> Self {
        Self {
            engine: None,
            scope: Scope::new(),
            base_scope_len: 0,
            ast: None,
            pending_error: None,
            cancel_slot: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }

    fn build_engine(&self, sink: SharedSink) -> Engine {
        let mut engine = Engine::new();

        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_ARRAY_SIZE);
        engine.set_max_map_size(MAX_MAP_SIZE);

        let slot = self.cancel_slot.clone();
        engine.on_progress(move |ops| {
            if ops % CANCEL_POLL_INTERVAL != 0 {
                return None;
            }
            let cancelled = slot
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_cancelled();
            cancelled.then(|| CANCELLED_TOKEN.into())
        });

        let print_sink = sink.clone();
        engine.on_print(move |text| print_sink.write(text));
        engine.on_debug(move |text, _source, _pos| sink.write(text));

        engine
            .register_type_with_name::<HostHandle>("HostObject")
            .register_fn("invoke", |h: &mut HostHandle, method: &str| {
                h.invoke(method, Array::new())
            })
            .register_fn("invoke", |h: &mut HostHandle, method: &str, args: Array| {
                h.invoke(method, args)
            })
            .register_fn("type_name", |h: &mut HostHandle| h.0.type_name().to_string())
            .register_indexer_get(HostHandle::property);

        engine
    }
}

impl Default for RhaiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBackend for RhaiBackend {
    fn id(&self) -> BackendId {
        BackendId::Rhai
    }

    fn init_engine(&mut self, bindings: &BindingRegistry, sink: SharedSink) -> ScriptResult<()> {
        let engine = self.build_engine(sink);

        let mut scope = Scope::new();
        for (name, value) in bindings.resolved_for(BackendId::Rhai) {
            scope.push_constant_dynamic(name, to_dynamic(&value));
        }
        self.base_scope_len = scope.len();
        self.scope = scope;
        self.engine = Some(engine);
        debug!(bindings = self.base_scope_len, "Rhai engine initialised");
        Ok(())
    }

    fn init_script(&mut self, source: &str) -> ScriptResult<()> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| ScriptError::backend("Rhai", "engine not initialised"))?;

        match engine.compile_with_scope(&self.scope, source) {
            Ok(ast) => {
                self.ast = Some(ast);
                self.pending_error = None;
            }
            Err(e) => {
                debug!(error = %e, "Rhai compile failed; deferring to execute");
                self.ast = None;
                self.pending_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    fn execute(&mut self, cancel: &CancellationToken) -> ScriptResult<()> {
        if let Some(message) = &self.pending_error {
            return Err(ScriptError::compile(message));
        }
        let (Some(engine), Some(ast)) = (self.engine.as_ref(), self.ast.as_ref()) else {
            return Err(ScriptError::runtime("no script loaded"));
        };

        *self
            .cancel_slot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let result = engine.run_ast_with_scope(&mut self.scope, ast);
        self.scope.rewind(self.base_scope_len);

        result.map_err(|e| convert_rhai_error(e, cancel))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Convert Rhai's EvalAltResult to our ScriptError type
fn convert_rhai_error(error: Box<EvalAltResult>, cancel: &CancellationToken) -> ScriptError {
    match *error {
        EvalAltResult::ErrorTerminated(_, _) if cancel.is_cancelled() => ScriptError::Cancelled,
        EvalAltResult::ErrorParsing(parse_error, pos) => {
            ScriptError::compile(format!("{} ({})", parse_error, pos))
        }
        EvalAltResult::ErrorRuntime(value, pos) => {
            ScriptError::runtime(format!("{} ({})", value, pos))
        }
        other => ScriptError::runtime(other),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
