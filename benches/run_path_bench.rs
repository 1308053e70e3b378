use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use simscript::config::ScriptingConfig;
use simscript::scripting::{available_backends, BackendId, EngineBuilder, ScriptEngine};

fn script_for(backend: BackendId) -> &'static str {
    match backend {
        BackendId::Rhai => "let x = 1 + 1; print(x);",
        BackendId::QuickJs => "let x = 1 + 1; print(x);",
        BackendId::Python | BackendId::PythonWrapped => "x = 1 + 1\nprint(x)",
    }
}

fn engine(backend: BackendId, fast_path: bool) -> ScriptEngine {
    let mut config = ScriptingConfig::default();
    config.backend = backend.into();
    config.fast_path.enabled = fast_path;
    config.fast_path.min_invocations = 0;

    let mut engine = EngineBuilder::new(config)
        .build()
        .expect("engine builds");
    assert!(engine.init_script(script_for(backend)), "{}", engine.result());
    engine
}

fn benchmark_run_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_path");
    for backend in available_backends() {
        for (label, fast_path) in [("safe", false), ("fast", true)] {
            let mut engine = engine(backend, fast_path);
            group.bench_with_input(
                BenchmarkId::new(label, backend.key()),
                &backend,
                |b, _| {
                    b.iter(|| black_box(engine.run()));
                },
            );
        }
    }
    group.finish();
}

criterion_group!(name = benches; config = Criterion::default().sample_size(50); targets = benchmark_run_paths);
criterion_main!(benches);
