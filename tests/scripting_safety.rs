mod common;

use common::{engine_for, infinite_loop, interruptible_backends};
use simscript::messages::{DefaultCatalog, MessageCatalog, MessageId};
use simscript::scripting::BackendId;
use std::time::{Duration, Instant};

#[test]
fn test_simple_script() {
    let mut engine = engine_for(BackendId::Rhai, 1_000);
    assert!(engine.init_script("print(5 + 5);"));
    assert!(engine.run());
    assert_eq!(engine.result(), "10");
}

#[test]
fn test_infinite_loop_times_out() {
    let timeout = DefaultCatalog.message(MessageId::ExecutionTimeout, &["100"]);
    for backend in interruptible_backends() {
        let mut engine = engine_for(backend, 100);
        assert!(engine.init_script(infinite_loop(backend)));

        let start = Instant::now();
        assert!(!engine.run(), "{backend} should time out");
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2), "{backend} took {elapsed:?}");
        assert_eq!(engine.result(), timeout);
    }
}

#[test]
fn test_engine_reusable_after_timeout() {
    for backend in interruptible_backends() {
        let mut engine = engine_for(backend, 100);
        engine.init_script(infinite_loop(backend));
        assert!(!engine.run());

        // Give the cancelled worker time to release the backend.
        std::thread::sleep(Duration::from_millis(200));
        assert!(engine.init_script("print(\"alive\")"));
        assert!(engine.run(), "{backend}: {}", engine.result());
        assert_eq!(engine.result(), "alive");
    }
}

#[test]
fn test_script_validation() {
    let mut engine = engine_for(BackendId::Rhai, 1_000);

    // Valid script
    assert!(engine.init_script("let x = 10;"));
    assert!(engine.run());

    // Invalid syntax surfaces on the next run
    assert!(engine.init_script("let x = ;"));
    assert!(!engine.run());
    assert!(!engine.result().is_empty());
}

#[test]
fn test_rhai_rejects_eval_and_import() {
    let mut engine = engine_for(BackendId::Rhai, 1_000);

    engine.init_script(r#"eval("print(1)")"#);
    assert!(!engine.run());

    engine.init_script(r#"import "fs" as fs;"#);
    assert!(!engine.run());
}

#[test]
fn test_output_is_capped() {
    let mut engine = engine_for(BackendId::Rhai, 30_000);
    // 20,000 chunks of 1,000 characters
    assert!(engine.init_script(
        r#"
        let chunk = "";
        chunk.pad(1000, 'x');
        for i in 0..20000 { print(chunk); }
        "#
    ));
    assert!(engine.run(), "{}", &engine.result()[..100.min(engine.result().len())]);
    assert_eq!(engine.result().chars().count(), 10_000_000);
}

#[cfg(feature = "scripting_js")]
mod quickjs {
    use super::common::engine_for;
    use simscript::scripting::pluggable::{BLOCKED_BINDINGS, JAVASCRIPT_ENGINE};
    use simscript::scripting::{BackendId, EngineBuilder, EngineManager, WrappedBackend};
    use simscript::scripting::{BindingRegistry, ScriptBackend, SharedSink};

    const ESCAPE_HATCHES: &[&str] = &["scriptArgs", "loadScript", "evalScript", "Worker", "Function"];

    #[test]
    fn test_blocked_names_are_undefined() {
        let mut engine = EngineBuilder::new(super::common::config_for(BackendId::QuickJs, 1_000))
            .bind("os", "host shell")
            .bind("require", "loader")
            .build()
            .unwrap();

        for name in BLOCKED_BINDINGS.iter().chain(ESCAPE_HATCHES) {
            assert!(engine.init_script(&format!(
                "print(globalThis[\"{name}\"] === undefined)"
            )));
            assert!(engine.run(), "{name}: {}", engine.result());
            assert_eq!(engine.result(), "true", "{name} leaked into the sandbox");
        }
    }

    #[test]
    fn test_load_never_executes_script_code() {
        let mut engine = engine_for(BackendId::QuickJs, 100);
        assert!(!engine.init_script(r#"}), print("ran-at-load"), (function(){"#));
        assert!(!engine.init_script("}), (function(){ while(true){} })(), (function(){"));
        assert!(!engine.result().contains("ran-at-load"));

        assert!(engine.init_script("}\nprint(\"escaped\");\nfunction again() {"));
        assert!(!engine.run());
        assert!(!engine.result().starts_with("escaped"), "{}", engine.result());
    }

    #[test]
    fn test_print_still_available() {
        let mut engine = engine_for(BackendId::QuickJs, 1_000);
        engine.init_script("print(typeof print)");
        assert!(engine.run());
        assert_eq!(engine.result(), "function");
    }

    #[test]
    fn test_wrapped_backend_reports_sandbox() {
        let mut backend = WrappedBackend::with_manager(
            BackendId::QuickJs,
            JAVASCRIPT_ENGINE,
            EngineManager::with_builtin_engines(),
        );
        backend
            .init_engine(&BindingRegistry::new(), SharedSink::default())
            .unwrap();
        assert!(!backend.is_defined("eval").unwrap());
        assert!(backend.is_defined("print").unwrap());
        assert!(backend.is_defined("Math").unwrap());
    }
}

#[cfg(feature = "scripting_python")]
mod python {
    use super::common::engine_for;
    use simscript::scripting::{available_backends, BackendId};

    #[test]
    fn test_imports_and_files_blocked() {
        for backend in [BackendId::Python, BackendId::PythonWrapped] {
            if !available_backends().contains(&backend) {
                continue;
            }
            let mut engine = engine_for(backend, 1_000);
            for script in ["import os", "open('/etc/hosts')", "__import__('sys')"] {
                assert!(engine.init_script(script));
                assert!(!engine.run(), "{backend}: {script} was allowed");
            }
        }
    }
}
