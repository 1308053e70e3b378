//! QuickJS engine for the pluggable registry.
//!
//! Loading a script only parses it: the source is declared as the body of a
//! module's default function, which QuickJS compiles without evaluating. No
//! script code runs before the first `eval_compiled`. That first run builds
//! the script function inside the run's budget and parks it in a hidden global
//! slot, so later runs are a single call with no parse step. Scripts run in
//! strict mode. Cancellation is polled from the runtime's interrupt handler.
//!
//! Code generation from strings is closed at engine creation: besides `eval`,
//! which the sandbox removes, the constructors reachable through
//! `(function () {}).constructor` and its async and generator variants throw.
//!
//! Host objects become plain JS objects carrying one native function per
//! method the object declares; property reads are not forwarded.

use rquickjs::convert::Coerced;
use rquickjs::function::{Func, Rest};
use rquickjs::object::Property;
use rquickjs::{Array, Context, Ctx, Exception, FromJs, Function, Module, Object, Runtime, Value};
use std::sync::{Arc, PoisonError, RwLock};

use super::{CompiledScript, PluggableEngine, JAVASCRIPT_ENGINE};
use crate::error::{ScriptError, ScriptResult};
use crate::scripting::bindings::PRINT_BINDING;
use crate::scripting::output::SharedSink;
use crate::scripting::script_engine::CancellationToken;
use crate::scripting::value::{HostObject, HostValue};

/// Heap limit for a single engine.
const MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// QuickJS-specific globals that reach outside the sandbox.
const ESCAPE_HATCHES: &[&str] = &["scriptArgs", "loadScript", "evalScript", "Worker", "Function"];

/// Global slot holding the loaded script's function after its first run.
const SCRIPT_SLOT: &str = "__simscript_script__";

/// Replaces every function constructor reachable from a function value.
const LOCKDOWN: &str = r#"
(() => {
    const refuse = function () {
        throw new EvalError("code generation from strings is disabled");
    };
    const prototypes = [
        Function.prototype,
        Object.getPrototypeOf(async function () {}),
        Object.getPrototypeOf(function* () {}),
        Object.getPrototypeOf(async function* () {}),
    ];
    for (const prototype of prototypes) {
        Object.defineProperty(prototype, "constructor", {
            value: refuse,
            writable: false,
            configurable: false,
        });
    }
})();
"#;

struct LoadedScript {
    id: u64,
    /// Function expression evaluated on the first run.
    function_source: String,
}

/// QuickJS engine instance.
pub struct QuickJsEngine {
    loaded: Option<LoadedScript>,
    context: Context,
    _runtime: Runtime,
    cancel_slot: Arc<RwLock<CancellationToken>>,
    next_script_id: u64,
}

impl QuickJsEngine {
    /// Create a runtime with a full standard context.
    pub fn new() -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::backend("QuickJS", e))?;
        runtime.set_memory_limit(MEMORY_LIMIT);

        let cancel_slot = Arc::new(RwLock::new(CancellationToken::new()));
        let slot = cancel_slot.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            slot.read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_cancelled()
        })));

        let context = Context::full(&runtime).map_err(|e| ScriptError::backend("QuickJS", e))?;
        context
            .with(|ctx| {
                ctx.eval::<(), _>(LOCKDOWN)
                    .map_err(|e| describe_error(&ctx, e))
            })
            .map_err(|e| ScriptError::backend("QuickJS", e))?;

        Ok(Self {
            loaded: None,
            context,
            _runtime: runtime,
            cancel_slot,
            next_script_id: 0,
        })
    }

    /// Registry factory.
    pub fn boxed() -> ScriptResult<Box<dyn PluggableEngine>> {
        Ok(Box::new(Self::new()?))
    }

    fn arm(&self, cancel: &CancellationToken) {
        *self
            .cancel_slot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cancel.clone();
    }

    fn setup_error(&self, err: rquickjs::Error) -> ScriptError {
        let message = self.context.with(|ctx| describe_error(&ctx, err));
        ScriptError::backend("QuickJS", message)
    }
}

impl PluggableEngine for QuickJsEngine {
    fn engine_name(&self) -> &'static str {
        JAVASCRIPT_ENGINE
    }

    fn put(&mut self, name: &str, value: &HostValue) -> ScriptResult<()> {
        self.context
            .with(|ctx| {
                let value = to_js(&ctx, value)?;
                ctx.globals().set(name, value)
            })
            .map_err(|e| self.setup_error(e))
    }

    fn install_print(&mut self, sink: SharedSink) -> ScriptResult<()> {
        self.context
            .with(|ctx| {
                let print = Func::from(move |args: Rest<Coerced<String>>| {
                    let text: String = args.0.into_iter().map(|part| part.0).collect();
                    sink.write(&text);
                });
                ctx.globals().set(PRINT_BINDING, print)
            })
            .map_err(|e| self.setup_error(e))
    }

    fn remove(&mut self, name: &str) -> ScriptResult<()> {
        self.context
            .with(|ctx| ctx.globals().remove(name))
            .map_err(|e| self.setup_error(e))
    }

    fn is_defined(&mut self, name: &str) -> ScriptResult<bool> {
        self.context
            .with(|ctx| -> rquickjs::Result<bool> {
                let value: Value = ctx.globals().get(name)?;
                Ok(!value.is_undefined())
            })
            .map_err(|e| self.setup_error(e))
    }

    fn escape_hatches(&self) -> &'static [&'static str] {
        ESCAPE_HATCHES
    }

    fn compile(&mut self, source: &str) -> ScriptResult<Option<CompiledScript>> {
        self.loaded = None;
        self.next_script_id += 1;
        let id = self.next_script_id;

        self.context.with(|ctx| -> ScriptResult<()> {
            ctx.globals()
                .remove(SCRIPT_SLOT)
                .map_err(|e| ScriptError::backend("QuickJS", describe_error(&ctx, e)))?;
            // Parsed as a module body; declared modules are never evaluated.
            Module::declare(
                ctx.clone(),
                format!("script-{id}"),
                format!("export default function () {{\n{source}\n}}"),
            )
            .map(|_| ())
            .map_err(|e| ScriptError::compile(describe_error(&ctx, e)))
        })?;

        self.loaded = Some(LoadedScript {
            id,
            function_source: format!("(function () {{\n\"use strict\";\n{source}\n}})"),
        });
        Ok(Some(CompiledScript::new(id)))
    }

    fn eval(&mut self, source: &str, cancel: &CancellationToken) -> ScriptResult<()> {
        self.arm(cancel);
        self.context.with(|ctx| {
            ctx.eval::<Value, _>(source)
                .map(|_| ())
                .map_err(|e| run_error(&ctx, e, cancel))
        })
    }

    fn eval_compiled(
        &mut self,
        script: &CompiledScript,
        cancel: &CancellationToken,
    ) -> ScriptResult<()> {
        let function_source = match &self.loaded {
            Some(loaded) if loaded.id == script.id() => loaded.function_source.as_str(),
            _ => return Err(ScriptError::runtime("compiled script is no longer loaded")),
        };
        self.arm(cancel);
        self.context.with(|ctx| {
            loaded_function(&ctx, function_source)
                .and_then(|function| function.call::<_, Value>(()))
                .map(|_| ())
                .map_err(|e| run_error(&ctx, e, cancel))
        })
    }
}

/// The loaded script's function, built from its source on the first run.
fn loaded_function<'js>(ctx: &Ctx<'js>, function_source: &str) -> rquickjs::Result<Function<'js>> {
    let globals = ctx.globals();
    let parked: Value = globals.get(SCRIPT_SLOT)?;
    if let Some(function) = parked.into_function() {
        return Ok(function);
    }
    let function: Function = ctx.eval(function_source)?;
    globals.prop(SCRIPT_SLOT, Property::from(function.clone()).configurable())?;
    Ok(function)
}

// =============================================================================
// Conversions
// =============================================================================

/// Project a host value into the context.
fn to_js<'js>(ctx: &Ctx<'js>, value: &HostValue) -> rquickjs::Result<Value<'js>> {
    Ok(match value {
        HostValue::Unit => Value::new_undefined(ctx.clone()),
        HostValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        HostValue::Int(i) => match i32::try_from(*i) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            Err(_) => Value::new_float(ctx.clone(), *i as f64),
        },
        HostValue::Float(f) => Value::new_float(ctx.clone(), *f),
        HostValue::Str(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        HostValue::List(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, to_js(ctx, item)?)?;
            }
            array.into_value()
        }
        HostValue::Object(object) => host_object(ctx, object)?.into_value(),
    })
}

fn host_object<'js>(ctx: &Ctx<'js>, object: &Arc<dyn HostObject>) -> rquickjs::Result<Object<'js>> {
    let projected = Object::new(ctx.clone())?;
    for method in object.methods() {
        let target = object.clone();
        let name = method.clone();
        let function = Func::from(
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let args: Vec<HostValue> = args.0.iter().map(from_js).collect();
                match target.call(&name, &args) {
                    Ok(value) => to_js(&ctx, &value),
                    Err(e) => Err(Exception::throw_message(&ctx, &e.to_string())),
                }
            },
        );
        projected.set(method.as_str(), function)?;
    }
    Ok(projected)
}

/// Convert a JS value into a host value. Objects and functions become their
/// string form.
fn from_js(value: &Value<'_>) -> HostValue {
    if value.is_undefined() || value.is_null() {
        return HostValue::Unit;
    }
    if let Some(b) = value.as_bool() {
        return HostValue::Bool(b);
    }
    if let Some(i) = value.as_int() {
        return HostValue::Int(i64::from(i));
    }
    if let Some(f) = value.as_float() {
        return HostValue::Float(f);
    }
    if let Some(s) = value.as_string() {
        return s.to_string().map(HostValue::Str).unwrap_or(HostValue::Unit);
    }
    if let Some(array) = value.as_array() {
        return HostValue::List(
            array
                .iter::<Value>()
                .filter_map(Result::ok)
                .map(|item| from_js(&item))
                .collect(),
        );
    }
    Coerced::<String>::from_js(value.ctx(), value.clone())
        .map(|s| HostValue::Str(s.0))
        .unwrap_or(HostValue::Unit)
}

// =============================================================================
// Errors
// =============================================================================

fn run_error(ctx: &Ctx<'_>, err: rquickjs::Error, cancel: &CancellationToken) -> ScriptError {
    if cancel.is_cancelled() {
        // Drain the pending interrupt exception.
        let _ = ctx.catch();
        return ScriptError::Cancelled;
    }
    ScriptError::runtime(describe_error(ctx, err))
}

fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_object().cloned().and_then(Exception::from_object) {
        let name: Option<String> = exception.as_object().get("name").ok();
        if let Some(message) = exception.message() {
            return match name {
                Some(name) if !name.is_empty() => format!("{name}: {message}"),
                _ => message,
            };
        }
    }
    match Coerced::<String>::from_js(ctx, caught) {
        Ok(text) => text.0,
        Err(e) => format!("uncaught exception ({e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::output::OutputSink;
    use crate::scripting::value::HostCallError;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Tally {
        hits: Mutex<i64>,
    }

    impl HostObject for Tally {
        fn type_name(&self) -> &str {
            "Tally"
        }

        fn methods(&self) -> Vec<String> {
            vec!["hit".to_string(), "fail".to_string()]
        }

        fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue, HostCallError> {
            match method {
                "hit" => {
                    let mut hits = self.hits.lock().unwrap();
                    *hits += args.first().and_then(HostValue::as_int).unwrap_or(1);
                    Ok(HostValue::Int(*hits))
                }
                _ => Err(HostCallError::Failed("tally jammed".to_string())),
            }
        }
    }

    fn engine_with_sink() -> (QuickJsEngine, SharedSink) {
        let sink = SharedSink::new(OutputSink::buffered(1_000));
        let mut engine = QuickJsEngine::new().unwrap();
        engine.install_print(sink.clone()).unwrap();
        (engine, sink)
    }

    fn run(engine: &mut QuickJsEngine, source: &str) -> ScriptResult<()> {
        let script = engine.compile(source)?.unwrap();
        engine.eval_compiled(&script, &CancellationToken::new())
    }

    #[test]
    fn test_print_concatenates_arguments() {
        let (mut engine, sink) = engine_with_sink();
        run(&mut engine, r#"print("a", 1, true); print(2.5);"#).unwrap();
        assert_eq!(sink.results(), "a1true2.5");
    }

    #[test]
    fn test_plain_bindings() {
        let (mut engine, sink) = engine_with_sink();
        engine.put("limit", &HostValue::Int(3)).unwrap();
        engine
            .put("names", &HostValue::List(vec!["x".into(), "y".into()]))
            .unwrap();
        run(&mut engine, "print(limit * 2, names.join('-'));").unwrap();
        assert_eq!(sink.results(), "6x-y");
    }

    #[test]
    fn test_host_object_methods() {
        let tally = Arc::new(Tally::default());
        let (mut engine, sink) = engine_with_sink();
        engine.put("tally", &HostValue::Object(tally.clone())).unwrap();

        run(&mut engine, "tally.hit(); print(tally.hit(4));").unwrap();
        assert_eq!(sink.results(), "5");
        assert_eq!(*tally.hits.lock().unwrap(), 5);
    }

    #[test]
    fn test_host_error_is_catchable() {
        let (mut engine, sink) = engine_with_sink();
        engine.put("tally", &HostValue::object(Tally::default())).unwrap();
        run(
            &mut engine,
            "try { tally.fail(); } catch (e) { print('caught ' + e.message); }",
        )
        .unwrap();
        assert_eq!(sink.results(), "caught tally jammed");
    }

    #[test]
    fn test_compiled_script_reruns_without_state_leak() {
        let (mut engine, sink) = engine_with_sink();
        let script = engine.compile("let n = 1; print(n);").unwrap().unwrap();
        engine.eval_compiled(&script, &CancellationToken::new()).unwrap();
        engine.eval_compiled(&script, &CancellationToken::new()).unwrap();
        assert_eq!(sink.results(), "11");
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        let (mut engine, _sink) = engine_with_sink();
        assert!(matches!(
            engine.compile("let = ;"),
            Err(ScriptError::Compile { .. })
        ));
    }

    #[test]
    fn test_runtime_error_message() {
        let (mut engine, _sink) = engine_with_sink();
        let err = run(&mut engine, "undefinedThing();").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
        assert!(err.message().contains("undefinedThing"));
    }

    #[test]
    fn test_stale_compiled_handle_rejected() {
        let (mut engine, _sink) = engine_with_sink();
        let first = engine.compile("1").unwrap().unwrap();
        engine.compile("2").unwrap();
        assert!(engine
            .eval_compiled(&first, &CancellationToken::new())
            .is_err());
    }

    #[test]
    fn test_cancelled_token_interrupts_loop() {
        let (mut engine, _sink) = engine_with_sink();
        let script = engine.compile("while (true) {}").unwrap().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            engine.eval_compiled(&script, &token),
            Err(ScriptError::Cancelled)
        ));

        // A fresh token re-arms the engine.
        let script = engine.compile("print('ok');").unwrap().unwrap();
        assert!(engine.eval_compiled(&script, &CancellationToken::new()).is_ok());
    }

    #[test]
    fn test_loading_runs_no_script_code() {
        let (mut engine, sink) = engine_with_sink();
        let err = engine
            .compile(r#"}), print("ran-at-load"), (function(){"#)
            .unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }));

        // Would never return if the loop ran during loading.
        assert!(engine
            .compile("}), (function(){ while(true){} })(), (function(){")
            .is_err());
        assert_eq!(sink.results(), "");
    }

    #[test]
    fn test_source_cannot_escape_function_body_at_run() {
        let (mut engine, sink) = engine_with_sink();
        let script = engine
            .compile("}\nprint(\"escaped\");\nfunction again() {")
            .unwrap()
            .unwrap();
        assert!(engine
            .eval_compiled(&script, &CancellationToken::new())
            .is_err());
        assert_eq!(sink.results(), "");
    }

    #[test]
    fn test_parked_function_survives_deletion() {
        let (mut engine, sink) = engine_with_sink();
        let script = engine
            .compile(&format!("print(typeof {SCRIPT_SLOT}); delete globalThis.{SCRIPT_SLOT};"))
            .unwrap()
            .unwrap();
        engine.eval_compiled(&script, &CancellationToken::new()).unwrap();
        engine.eval_compiled(&script, &CancellationToken::new()).unwrap();
        assert_eq!(sink.results(), "functionfunction");
    }

    #[test]
    fn test_scripts_run_in_strict_mode() {
        let (mut engine, _sink) = engine_with_sink();
        let err = run(&mut engine, "undeclaredName = 1;").unwrap_err();
        assert!(err.message().contains("undeclaredName"));
    }

    #[test]
    fn test_function_constructors_refused() {
        let (mut engine, sink) = engine_with_sink();
        run(
            &mut engine,
            r#"
            const sources = [
                function () {},
                async function () {},
                function* () {},
                async function* () {},
            ];
            for (const f of sources) {
                try {
                    f.constructor("print('escaped')")();
                } catch (e) {
                    print(e.name, ";");
                }
            }
            "#,
        )
        .unwrap();
        assert_eq!(sink.results(), "EvalError;EvalError;EvalError;EvalError;");
    }

    #[test]
    fn test_remove_and_is_defined() {
        let (mut engine, _sink) = engine_with_sink();
        engine.put("secret", &HostValue::from("x")).unwrap();
        assert!(engine.is_defined("secret").unwrap());
        engine.remove("secret").unwrap();
        assert!(!engine.is_defined("secret").unwrap());
        // Removing an absent name is fine.
        engine.remove("never_defined").unwrap();
    }
}
