//! Python engine for the pluggable registry.
//!
//! This engine never pre-compiles: `compile` returns `None` and the wrapped
//! backend hands the raw source to `eval` on every run.

use pyo3::prelude::*;
use pyo3::types::PyDict;

use super::{PluggableEngine, PYTHON_ENGINE};
use crate::error::{ScriptError, ScriptResult};
use crate::scripting::bindings::PRINT_BINDING;
use crate::scripting::output::SharedSink;
use crate::scripting::pyo3_engine::{print_function, restricted_builtins, to_py, PYTHON_ESCAPE_HATCHES};
use crate::scripting::script_engine::CancellationToken;
use crate::scripting::value::HostValue;

const BUILTINS_KEY: &str = "__builtins__";

/// Python engine instance: one globals dict with its own builtins copy.
pub struct PythonEngine {
    globals: Py<PyDict>,
    builtins: Py<PyDict>,
}

impl PythonEngine {
    /// Fresh namespace over a private copy of `builtins`.
    pub fn new() -> ScriptResult<Self> {
        Python::with_gil(|py| -> PyResult<Self> {
            let builtins = restricted_builtins(py, &[])?;
            let globals = PyDict::new(py);
            globals.set_item(BUILTINS_KEY, &builtins)?;
            Ok(Self {
                globals: globals.unbind(),
                builtins: builtins.unbind(),
            })
        })
        .map_err(|e| ScriptError::backend("Python", e))
    }

    /// Registry factory.
    pub fn boxed() -> ScriptResult<Box<dyn PluggableEngine>> {
        Ok(Box::new(Self::new()?))
    }
}

impl PluggableEngine for PythonEngine {
    fn engine_name(&self) -> &'static str {
        PYTHON_ENGINE
    }

    fn put(&mut self, name: &str, value: &HostValue) -> ScriptResult<()> {
        Python::with_gil(|py| self.globals.bind(py).set_item(name, to_py(py, value)?))
            .map_err(|e| ScriptError::backend("Python", e))
    }

    fn install_print(&mut self, sink: SharedSink) -> ScriptResult<()> {
        Python::with_gil(|py| {
            self.globals
                .bind(py)
                .set_item(PRINT_BINDING, print_function(py, sink)?)
        })
        .map_err(|e| ScriptError::backend("Python", e))
    }

    fn remove(&mut self, name: &str) -> ScriptResult<()> {
        Python::with_gil(|py| -> PyResult<()> {
            for namespace in [self.globals.bind(py), self.builtins.bind(py)] {
                if namespace.contains(name)? {
                    namespace.del_item(name)?;
                }
            }
            Ok(())
        })
        .map_err(|e| ScriptError::backend("Python", e))
    }

    fn is_defined(&mut self, name: &str) -> ScriptResult<bool> {
        Python::with_gil(|py| -> PyResult<bool> {
            Ok(self.globals.bind(py).contains(name)? || self.builtins.bind(py).contains(name)?)
        })
        .map_err(|e| ScriptError::backend("Python", e))
    }

    fn escape_hatches(&self) -> &'static [&'static str] {
        PYTHON_ESCAPE_HATCHES
    }

    fn eval(&mut self, source: &str, _cancel: &CancellationToken) -> ScriptResult<()> {
        Python::with_gil(|py| -> ScriptResult<()> {
            let code = std::ffi::CString::new(source)
                .map_err(|e| ScriptError::compile(format!("source contains NUL byte: {e}")))?;
            py.run(&code, Some(self.globals.bind(py)), None)
                .map_err(|e| classify(py, e))
        })
    }
}

fn classify(py: Python<'_>, err: PyErr) -> ScriptError {
    if err.is_instance_of::<pyo3::exceptions::PySyntaxError>(py) {
        ScriptError::compile(err)
    } else {
        ScriptError::runtime(err)
    }
}
