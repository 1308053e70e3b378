//! Python backend through PyO3.
//!
//! The runtime is reached through a handful of guarded lookups into the
//! interpreter's `builtins` module (`compile`, `exec`, `dict`). If any of them
//! cannot be resolved the backend reports itself unavailable and the builder
//! moves on to the next candidate.
//!
//! This module also holds the conversions and host-object projection shared
//! with the wrapped `python` engine in [`crate::scripting::pluggable::python`].
//!
//! # Host Objects
//!
//! ```python
//! clock.advance(5.0)   # methods resolve through __getattr__
//! clock.time           # so do properties
//! ```
//!
//! # Limitations
//!
//! Python code is never interrupted. A run that exceeds its budget keeps its
//! worker thread until the script returns on its own.

use once_cell::sync::Lazy;
use pyo3::exceptions::{PyAttributeError, PyRuntimeError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyCFunction, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use pyo3::IntoPyObjectExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ScriptError, ScriptResult};
use crate::scripting::backend::BackendId;
use crate::scripting::bindings::{BindingRegistry, PRINT_BINDING};
use crate::scripting::output::SharedSink;
use crate::scripting::pluggable::BLOCKED_BINDINGS;
use crate::scripting::script_engine::{CancellationToken, ScriptBackend};
use crate::scripting::value::{HostObject, HostValue};

/// Python builtins that reach outside the sandbox.
pub const PYTHON_ESCAPE_HATCHES: &[&str] = &[
    "__import__",
    "open",
    "exec",
    "compile",
    "input",
    "breakpoint",
    "globals",
    "vars",
    "help",
];

/// Filename reported in Python tracebacks.
const SCRIPT_FILENAME: &str = "<script>";

static RUNTIME_PROBE: Lazy<bool> = Lazy::new(|| {
    let probed = std::panic::catch_unwind(|| Python::with_gil(|py| GuardedRuntime::resolve(py).is_ok()));
    match probed {
        Ok(true) => {
            debug!("Python runtime resolved");
            true
        }
        Ok(false) => {
            warn!("Python runtime present but builtins could not be resolved");
            false
        }
        Err(_) => {
            warn!("Python runtime failed to initialise");
            false
        }
    }
});

/// Whether an embedded Python runtime can be reached. Probed once.
pub fn probe_runtime() -> bool {
    *RUNTIME_PROBE
}

// =============================================================================
// Guarded runtime lookups
// =============================================================================

/// Entry points resolved from `builtins` before anything else is attempted.
struct GuardedRuntime {
    compile: PyObject,
    exec: PyObject,
    dict: PyObject,
}

impl GuardedRuntime {
    fn resolve(py: Python<'_>) -> PyResult<Self> {
        let builtins = py.import("builtins")?;
        Ok(Self {
            compile: builtins.getattr("compile")?.unbind(),
            exec: builtins.getattr("exec")?.unbind(),
            dict: builtins.getattr("dict")?.unbind(),
        })
    }
}

// =============================================================================
// Host object projection
// =============================================================================

/// Python view of a host object; attribute lookup is forwarded to the host.
#[pyclass(name = "HostObject", module = "simscript", frozen)]
pub struct PyHostObject {
    inner: Arc<dyn HostObject>,
}

#[pymethods]
impl PyHostObject {
    fn __getattr__(&self, py: Python<'_>, name: &str) -> PyResult<PyObject> {
        if self.inner.methods().iter().any(|m| m == name) {
            return Ok(bound_method(py, self.inner.clone(), name.to_string())?
                .into_any()
                .unbind());
        }
        match self.inner.get(name) {
            Some(value) => Ok(to_py(py, &value)?.unbind()),
            None => Err(PyAttributeError::new_err(format!(
                "'{}' object has no attribute '{}'",
                self.inner.type_name(),
                name
            ))),
        }
    }

    fn __repr__(&self) -> String {
        format!("<{}>", self.inner.type_name())
    }
}

fn bound_method<'py>(
    py: Python<'py>,
    target: Arc<dyn HostObject>,
    method: String,
) -> PyResult<Bound<'py, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<PyObject> {
            let py = args.py();
            let args: Vec<HostValue> = args.iter().map(|arg| from_py(&arg)).collect();
            let value = target
                .call(&method, &args)
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            Ok(to_py(py, &value)?.unbind())
        },
    )
}

/// Convert a host value into a Python object.
pub(crate) fn to_py<'py>(py: Python<'py>, value: &HostValue) -> PyResult<Bound<'py, PyAny>> {
    match value {
        HostValue::Unit => Ok(py.None().into_bound(py)),
        HostValue::Bool(b) => (*b).into_bound_py_any(py),
        HostValue::Int(i) => (*i).into_bound_py_any(py),
        HostValue::Float(f) => (*f).into_bound_py_any(py),
        HostValue::Str(s) => s.as_str().into_bound_py_any(py),
        HostValue::List(items) => {
            let items = items
                .iter()
                .map(|item| to_py(py, item))
                .collect::<PyResult<Vec<_>>>()?;
            Ok(PyList::new(py, items)?.into_any())
        }
        HostValue::Object(object) => Ok(Bound::new(
            py,
            PyHostObject {
                inner: object.clone(),
            },
        )?
        .into_any()),
    }
}

/// Convert a Python object into a host value. Unknown types become their `str()`.
pub(crate) fn from_py(object: &Bound<'_, PyAny>) -> HostValue {
    if object.is_none() {
        return HostValue::Unit;
    }
    // bool before int: bool is an int subclass
    if let Ok(b) = object.downcast::<PyBool>() {
        return HostValue::Bool(b.is_true());
    }
    if object.is_instance_of::<PyInt>() {
        if let Ok(i) = object.extract::<i64>() {
            return HostValue::Int(i);
        }
    }
    if let Ok(f) = object.downcast::<PyFloat>() {
        return HostValue::Float(f.value());
    }
    if let Ok(s) = object.downcast::<PyString>() {
        return HostValue::Str(s.to_string_lossy().into_owned());
    }
    if let Ok(host) = object.downcast::<PyHostObject>() {
        return HostValue::Object(host.get().inner.clone());
    }
    if let Ok(list) = object.downcast::<PyList>() {
        return HostValue::List(list.iter().map(|item| from_py(&item)).collect());
    }
    if let Ok(tuple) = object.downcast::<PyTuple>() {
        return HostValue::List(tuple.iter().map(|item| from_py(&item)).collect());
    }
    object
        .str()
        .map(|s| HostValue::Str(s.to_string_lossy().into_owned()))
        .unwrap_or(HostValue::Unit)
}

/// `print(*args)` writing the concatenated `str()` forms to `sink`.
pub(crate) fn print_function(py: Python<'_>, sink: SharedSink) -> PyResult<Bound<'_, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<()> {
            let mut text = String::new();
            for arg in args.iter() {
                text.push_str(&arg.str()?.to_string_lossy());
            }
            sink.write(&text);
            Ok(())
        },
    )
}

/// Copy of the `builtins` namespace without `blocked` names.
pub(crate) fn restricted_builtins<'py>(
    py: Python<'py>,
    blocked: &[&str],
) -> PyResult<Bound<'py, PyDict>> {
    let builtins = py.import("builtins")?.dict().copy()?;
    for name in blocked {
        if builtins.contains(*name)? {
            builtins.del_item(*name)?;
        }
    }
    Ok(builtins)
}

/// Every name stripped from a Python namespace.
pub(crate) fn python_blocklist() -> Vec<&'static str> {
    BLOCKED_BINDINGS
        .iter()
        .chain(PYTHON_ESCAPE_HATCHES)
        .copied()
        .collect()
}

// =============================================================================
// PythonBackend Implementation
// =============================================================================

/// Python implementation of ScriptBackend.
///
/// Bindings live in a base namespace; every run executes in a fresh shallow
/// copy of it so script-level names never leak between runs.
pub struct PythonBackend {
    runtime: Option<GuardedRuntime>,
    globals: Option<Py<PyDict>>,
    code: Option<PyObject>,
}

impl PythonBackend {
    /// Create an uninitialised backend; call `init_engine` before use.
    pub fn new() -> Self {
        Self {
            runtime: None,
            globals: None,
            code: None,
        }
    }
}

impl Default for PythonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBackend for PythonBackend {
    fn id(&self) -> BackendId {
        BackendId::Python
    }

    fn init_engine(&mut self, bindings: &BindingRegistry, sink: SharedSink) -> ScriptResult<()> {
        Python::with_gil(|py| -> PyResult<()> {
            let runtime = GuardedRuntime::resolve(py)?;

            let globals = PyDict::new(py);
            globals.set_item("__builtins__", restricted_builtins(py, &python_blocklist())?)?;
            for (name, value) in bindings.resolved_for(BackendId::Python) {
                globals.set_item(name, to_py(py, &value)?)?;
            }
            globals.set_item(PRINT_BINDING, print_function(py, sink)?)?;

            self.runtime = Some(runtime);
            self.globals = Some(globals.unbind());
            self.code = None;
            Ok(())
        })
        .map_err(|e| ScriptError::backend(BackendId::Python.name(), e))
    }

    fn init_script(&mut self, source: &str) -> ScriptResult<()> {
        self.code = None;
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| ScriptError::backend(BackendId::Python.name(), "engine not initialised"))?;

        let code = Python::with_gil(|py| {
            runtime
                .compile
                .call1(py, (source, SCRIPT_FILENAME, "exec"))
                .map_err(ScriptError::compile)
        })?;
        self.code = Some(code);
        Ok(())
    }

    fn execute(&mut self, _cancel: &CancellationToken) -> ScriptResult<()> {
        let (Some(runtime), Some(globals), Some(code)) =
            (self.runtime.as_ref(), self.globals.as_ref(), self.code.as_ref())
        else {
            return Err(ScriptError::runtime("no script loaded"));
        };

        Python::with_gil(|py| -> PyResult<()> {
            let namespace = runtime.dict.call1(py, (globals.bind(py),))?;
            runtime.exec.call1(py, (code.bind(py), namespace))?;
            Ok(())
        })
        .map_err(ScriptError::runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::output::OutputSink;
    use crate::scripting::value::HostCallError;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Gauge {
        level: Mutex<f64>,
    }

    impl HostObject for Gauge {
        fn type_name(&self) -> &str {
            "Gauge"
        }

        fn methods(&self) -> Vec<String> {
            vec!["fill".to_string()]
        }

        fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue, HostCallError> {
            match method {
                "fill" => {
                    let mut level = self.level.lock().unwrap();
                    *level += args.first().and_then(HostValue::as_float).unwrap_or(0.0);
                    Ok(HostValue::Float(*level))
                }
                other => Err(HostCallError::UnknownMember {
                    type_name: "Gauge".to_string(),
                    member: other.to_string(),
                }),
            }
        }

        fn get(&self, property: &str) -> Option<HostValue> {
            (property == "level").then(|| HostValue::Float(*self.level.lock().unwrap()))
        }
    }

    fn backend_with(bindings: &BindingRegistry) -> (PythonBackend, SharedSink) {
        let sink = SharedSink::new(OutputSink::buffered(1_000));
        let mut backend = PythonBackend::new();
        backend.init_engine(bindings, sink.clone()).unwrap();
        (backend, sink)
    }

    #[test]
    fn test_probe_resolves_runtime() {
        assert!(probe_runtime());
    }

    #[test]
    fn test_print_and_backend_binding() {
        let (mut backend, sink) = backend_with(&BindingRegistry::new());
        backend.init_script("print('on ', scripting_backend)").unwrap();
        backend.execute(&CancellationToken::new()).unwrap();
        assert_eq!(sink.results(), "on Python");
    }

    #[test]
    fn test_host_object_methods_and_properties() {
        let gauge = Arc::new(Gauge::default());
        let mut bindings = BindingRegistry::new();
        bindings.bind("gauge", HostValue::Object(gauge.clone()));

        let (mut backend, sink) = backend_with(&bindings);
        backend
            .init_script("gauge.fill(1.5)\ngauge.fill(1.0)\nprint(gauge.level)")
            .unwrap();
        backend.execute(&CancellationToken::new()).unwrap();
        assert_eq!(sink.results(), "2.5");
    }

    #[test]
    fn test_namespace_is_fresh_each_run() {
        let (mut backend, sink) = backend_with(&BindingRegistry::new());
        backend
            .init_script("try:\n    seen += 1\nexcept NameError:\n    seen = 1\nprint(seen)")
            .unwrap();
        backend.execute(&CancellationToken::new()).unwrap();
        backend.execute(&CancellationToken::new()).unwrap();
        assert_eq!(sink.results(), "11");
    }

    #[test]
    fn test_imports_and_open_blocked() {
        let (mut backend, _sink) = backend_with(&BindingRegistry::new());
        backend.init_script("import os").unwrap();
        assert!(backend.execute(&CancellationToken::new()).is_err());

        backend.init_script("open('/etc/passwd')").unwrap();
        assert!(backend.execute(&CancellationToken::new()).is_err());
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        let (mut backend, _sink) = backend_with(&BindingRegistry::new());
        assert!(matches!(
            backend.init_script("def broken(:"),
            Err(ScriptError::Compile { .. })
        ));
        assert!(backend.execute(&CancellationToken::new()).is_err());
    }

    #[test]
    fn test_value_conversion() {
        Python::with_gil(|py| {
            let value = HostValue::List(vec![
                HostValue::Int(3),
                HostValue::Bool(false),
                HostValue::Float(0.5),
                HostValue::from("z"),
                HostValue::Unit,
            ]);
            let object = to_py(py, &value).unwrap();
            assert_eq!(from_py(&object), value);
        });
    }
}
