//! Engine builder: wires configuration, bindings, a backend and the
//! execution engine together.
//!
//! ```rust,no_run
//! use simscript::config::ScriptingConfig;
//! use simscript::scripting::EngineBuilder;
//!
//! let mut engine = EngineBuilder::new(ScriptingConfig::default())
//!     .bind("station", "A")
//!     .build()?;
//! engine.init_script(r#"print("station " + station);"#);
//! engine.run();
//! println!("{}", engine.result());
//! # Ok::<(), simscript::error::ScriptError>(())
//! ```
//!
//! Construction is the only place a failure surfaces as an error: invalid
//! configuration, or no backend in the fallback chain could be initialised.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ScriptingConfig;
use crate::error::{ScriptError, ScriptResult};
use crate::messages::{DefaultCatalog, MessageCatalog, MessageId};
use crate::scripting::backend::{fallback_chain, BackendId};
use crate::scripting::bindings::BindingRegistry;
use crate::scripting::engine::{ExecutionPolicy, ScriptEngine};
use crate::scripting::output::{OutputSink, SharedSink};
use crate::scripting::rhai_engine::RhaiBackend;
use crate::scripting::script_engine::ScriptBackend;
use crate::scripting::value::HostValue;

/// Fresh, uninitialised adapter for `id`, or `None` when it is not compiled in.
pub fn create_backend(id: BackendId) -> Option<Box<dyn ScriptBackend>> {
    match id {
        BackendId::Rhai => Some(Box::new(RhaiBackend::new())),
        #[cfg(feature = "scripting_js")]
        BackendId::QuickJs => Some(Box::new(crate::scripting::pluggable::WrappedBackend::new(
            BackendId::QuickJs,
            crate::scripting::pluggable::JAVASCRIPT_ENGINE,
        ))),
        #[cfg(feature = "scripting_python")]
        BackendId::Python => Some(Box::new(crate::scripting::pyo3_engine::PythonBackend::new())),
        #[cfg(feature = "scripting_python")]
        BackendId::PythonWrapped => Some(Box::new(
            crate::scripting::pluggable::WrappedBackend::new(
                BackendId::PythonWrapped,
                crate::scripting::pluggable::PYTHON_ENGINE,
            ),
        )),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Builder for [`ScriptEngine`].
pub struct EngineBuilder {
    config: ScriptingConfig,
    bindings: BindingRegistry,
    stream: Option<crate::scripting::output::OutputCallback>,
    catalog: Arc<dyn MessageCatalog>,
}

impl EngineBuilder {
    /// Start from `config` with no bindings, a buffering sink and the English catalog.
    pub fn new(config: ScriptingConfig) -> Self {
        Self {
            config,
            bindings: BindingRegistry::new(),
            stream: None,
            catalog: Arc::new(DefaultCatalog),
        }
    }

    /// Make `value` addressable in scripts as `name`. Later bindings win.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.bindings.bind(name, value);
        self
    }

    /// Add every entry of `bindings`.
    pub fn bindings(mut self, bindings: &BindingRegistry) -> Self {
        for (name, value) in bindings.iter() {
            self.bindings.bind(name, value.clone());
        }
        self
    }

    /// Stream printed text to `callback` instead of buffering it.
    ///
    /// In streaming mode [`ScriptEngine::result`] only carries error and
    /// timeout messages.
    pub fn stream_output(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.stream = Some(Box::new(callback));
        self
    }

    /// Resolve user-facing messages through `catalog`.
    pub fn catalog(mut self, catalog: Arc<dyn MessageCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Validate the configuration, pick a backend and construct the engine.
    ///
    /// Candidates come from [`fallback_chain`]; a backend whose
    /// initialisation fails is logged and skipped.
    pub fn build(self) -> ScriptResult<ScriptEngine> {
        let chain = fallback_chain(self.config.backend);
        self.build_from(&chain)
    }

    /// [`build`](Self::build) against an explicit candidate list.
    pub fn build_from(self, candidates: &[BackendId]) -> ScriptResult<ScriptEngine> {
        self.config.validate()?;
        let sink = SharedSink::new(match self.stream {
            Some(callback) => OutputSink::streaming(callback),
            None => OutputSink::buffered(self.config.output.max_chars),
        });

        for &id in candidates {
            let Some(mut backend) = create_backend(id) else {
                debug!(backend = %id, "Backend not compiled in");
                continue;
            };
            match backend.init_engine(&self.bindings, sink.clone()) {
                Ok(()) => {
                    info!(
                        backend = %id,
                        requested = %self.config.backend,
                        bindings = self.bindings.len(),
                        "Scripting backend selected"
                    );
                    return ScriptEngine::new(
                        backend,
                        sink,
                        self.catalog,
                        ExecutionPolicy::from_config(&self.config),
                        self.config.worker_threads(),
                        Duration::from_millis(self.config.pool.keep_alive_ms),
                    );
                }
                Err(e) => {
                    let message = self
                        .catalog
                        .message(MessageId::EngineUnavailable, &[id.name()]);
                    warn!(backend = %id, error = %e, "{message}");
                }
            }
        }

        Err(ScriptError::BackendUnavailable {
            requested: self.config.backend.to_string(),
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("bindings", &self.bindings)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::scripting::backend::BackendPreference;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn rhai_config() -> ScriptingConfig {
        ScriptingConfig {
            backend: BackendPreference::Backend(BackendId::Rhai),
            ..ScriptingConfig::default()
        }
    }

    #[test]
    fn test_preferred_backend_is_used() {
        let engine = EngineBuilder::new(rhai_config()).build().unwrap();
        assert_eq!(engine.backend_id(), BackendId::Rhai);
    }

    #[test]
    fn test_auto_picks_first_available() {
        let engine = EngineBuilder::new(ScriptingConfig::default()).build().unwrap();
        assert_eq!(
            Some(engine.backend_id()),
            crate::scripting::backend::best_match(BackendPreference::Auto)
        );
    }

    #[traced_test]
    #[test]
    fn test_selection_is_logged() {
        EngineBuilder::new(rhai_config()).build().unwrap();
        assert!(logs_contain("Scripting backend selected"));
        assert!(logs_contain("Rhai"));
    }

    #[test]
    fn test_empty_chain_is_unavailable() {
        let err = EngineBuilder::new(ScriptingConfig::default())
            .build_from(&[])
            .unwrap_err();
        assert!(matches!(err, ScriptError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ScriptingConfig {
            max_execution_time_ms: 0,
            ..ScriptingConfig::default()
        };
        assert!(matches!(
            EngineBuilder::new(config).build(),
            Err(ScriptError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn test_bindings_reach_script() {
        let mut engine = EngineBuilder::new(rhai_config())
            .bind("station", "A")
            .bind("limit", 3_i64)
            .build()
            .unwrap();
        assert!(engine.init_script(r#"print(station + limit);"#));
        assert!(engine.run());
        assert_eq!(engine.result(), "A3");
    }

    #[test]
    fn test_streaming_sink_receives_output() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = received.clone();
        let mut engine = EngineBuilder::new(rhai_config())
            .stream_output(move |text| seen.lock().unwrap().push(text.to_string()))
            .build()
            .unwrap();

        engine.init_script(r#"print("a"); print("b");"#);
        assert!(engine.run());
        assert_eq!(engine.result(), "");
        assert_eq!(*received.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_custom_catalog() {
        struct Terse;
        impl MessageCatalog for Terse {
            fn message(&self, id: MessageId, _args: &[&str]) -> String {
                id.key().to_string()
            }
        }

        let mut engine = EngineBuilder::new(rhai_config())
            .catalog(Arc::new(Terse))
            .build()
            .unwrap();
        assert!(!engine.run());
        assert_eq!(engine.result(), "script.no_script");
    }
}
