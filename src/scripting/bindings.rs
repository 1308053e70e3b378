//! Binding registry: named host values injected into a script's global namespace.
//!
//! The host registers values by name before the engine is built. At build time
//! the registry is handed to the chosen backend's `init_engine`, which makes
//! every entry addressable under exactly its name and additionally injects:
//!
//! - [`PRINT_BINDING`]: a `print(...)` function wired to the output sink
//! - [`BACKEND_BINDING`]: a string naming the active backend, for scripts that
//!   branch on capability differences
//!
//! Sandboxing is not done here. Each backend exposes host interop through a
//! different surface, so each adapter strips dangerous names in its own way.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::scripting::backend::BackendId;
use crate::scripting::value::HostValue;

/// Name of the injected print function.
pub const PRINT_BINDING: &str = "print";

/// Name of the injected diagnostic string naming the active backend.
pub const BACKEND_BINDING: &str = "scripting_backend";

/// Name-to-value map flushed into a backend at engine construction.
#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    bindings: BTreeMap<String, HostValue>,
}

impl BindingRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `name`, returning the value it replaced.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Option<HostValue> {
        let name = name.into();
        let previous = self.bindings.insert(name.clone(), value.into());
        if previous.is_some() {
            debug!(binding = %name, "Overwriting existing binding");
        }
        previous
    }

    /// Look up a registered value.
    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.bindings.get(name)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Number of host bindings (injected bindings not counted).
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no host bindings are registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Host bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Everything a backend should inject as plain values: host bindings plus
    /// the diagnostic backend name. `print` is installed separately since its
    /// shape is backend specific.
    ///
    /// Host bindings that collide with an injected name are skipped.
    pub fn resolved_for(&self, backend: BackendId) -> Vec<(String, HostValue)> {
        let mut resolved = Vec::with_capacity(self.bindings.len() + 1);
        for (name, value) in &self.bindings {
            if name == PRINT_BINDING || name == BACKEND_BINDING {
                warn!(binding = %name, "Host binding shadows a reserved name and is ignored");
                continue;
            }
            resolved.push((name.clone(), value.clone()));
        }
        resolved.push((
            BACKEND_BINDING.to_string(),
            HostValue::Str(backend.name().to_string()),
        ));
        resolved
    }
}
