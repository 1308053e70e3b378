//! Shared fixtures for integration tests.
#![allow(dead_code)]

use simscript::config::ScriptingConfig;
use simscript::scripting::{BackendId, EngineBuilder, HostCallError, HostObject, HostValue, ScriptEngine};
use std::sync::Mutex;
use std::time::Duration;

/// Simulated clock a model advances between runs.
///
/// `pause` blocks the calling thread for `delay_ms`, which lets tests make an
/// individual run slow without touching the script.
#[derive(Debug, Default)]
pub struct SimulationClock {
    now: Mutex<f64>,
    delay_ms: Mutex<u64>,
}

impl SimulationClock {
    pub fn advance_to(&self, t: f64) {
        *self.now.lock().unwrap() = t;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay_ms.lock().unwrap() = delay.as_millis() as u64;
    }
}

impl HostObject for SimulationClock {
    fn type_name(&self) -> &str {
        "SimulationClock"
    }

    fn methods(&self) -> Vec<String> {
        vec!["now".to_string(), "advance".to_string(), "pause".to_string()]
    }

    fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue, HostCallError> {
        match method {
            "now" => Ok(HostValue::Float(*self.now.lock().unwrap())),
            "advance" => {
                let step = args.first().and_then(HostValue::as_float).ok_or_else(|| {
                    HostCallError::InvalidArguments {
                        method: "advance".to_string(),
                        message: "expected a number".to_string(),
                    }
                })?;
                let mut now = self.now.lock().unwrap();
                *now += step;
                Ok(HostValue::Float(*now))
            }
            "pause" => {
                let delay = *self.delay_ms.lock().unwrap();
                std::thread::sleep(Duration::from_millis(delay));
                Ok(HostValue::Unit)
            }
            other => Err(HostCallError::UnknownMember {
                type_name: self.type_name().to_string(),
                member: other.to_string(),
            }),
        }
    }

    fn get(&self, property: &str) -> Option<HostValue> {
        (property == "time").then(|| HostValue::Float(*self.now.lock().unwrap()))
    }
}

/// Config pinned to `backend` with a `timeout_ms` budget.
pub fn config_for(backend: BackendId, timeout_ms: u32) -> ScriptingConfig {
    let mut config = ScriptingConfig::default();
    config.backend = backend.into();
    config.max_execution_time_ms = timeout_ms;
    config
}

/// Engine on exactly `backend`.
pub fn engine_for(backend: BackendId, timeout_ms: u32) -> ScriptEngine {
    let engine = EngineBuilder::new(config_for(backend, timeout_ms))
        .build()
        .unwrap();
    assert_eq!(engine.backend_id(), backend);
    engine
}

/// `print("<text>")` is valid in every supported language.
pub fn print_script(text: &str) -> String {
    format!("print(\"{text}\")")
}

/// A loop that never yields on its own.
pub fn infinite_loop(backend: BackendId) -> &'static str {
    match backend {
        BackendId::Rhai => "loop { }",
        BackendId::QuickJs => "while (true) {}",
        BackendId::Python | BackendId::PythonWrapped => "while True:\n    pass",
    }
}

/// Backends that honour cancellation.
pub fn interruptible_backends() -> Vec<BackendId> {
    simscript::scripting::available_backends()
        .into_iter()
        .filter(|id| matches!(id, BackendId::Rhai | BackendId::QuickJs))
        .collect()
}
