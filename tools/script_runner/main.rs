//! Run a script file through the scripting core from the command line.
//!
//! ```text
//! script_runner --backend rhai --runs 1000 model.rhai
//! script_runner --list-backends
//! ```
use anyhow::{bail, Context, Result};
use clap::Parser;
use simscript::config::ScriptingConfig;
use simscript::scripting::{available_backends, BackendPreference, EngineBuilder};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "script_runner", about = "Run a simulation script on the best available backend")]
struct Args {
    /// Script to run.
    #[arg(required_unless_present = "list_backends")]
    script: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend preference (auto, quickjs, python, python_wrapped, rhai).
    #[arg(short, long)]
    backend: Option<BackendPreference>,

    /// Per-run time budget in milliseconds.
    #[arg(short, long)]
    timeout_ms: Option<u32>,

    /// How many times to run the script.
    #[arg(short, long, default_value_t = 1)]
    runs: u64,

    /// Print the backends usable on this host and exit.
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    // Initialize tracing with RUST_LOG env var
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.list_backends {
        for backend in available_backends() {
            println!("{:<16} {}", backend.key(), backend.name());
        }
        return Ok(());
    }

    let mut config = ScriptingConfig::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.max_execution_time_ms = timeout_ms;
    }

    let Some(path) = args.script else {
        bail!("no script given");
    };
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut engine = EngineBuilder::new(config).build()?;
    if !engine.init_script(&source) {
        bail!("{}", engine.result());
    }

    let start = Instant::now();
    let mut success = false;
    for _ in 0..args.runs {
        success = engine.run();
    }
    info!(
        backend = %engine.backend_id(),
        runs = args.runs,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Runs finished"
    );

    print!("{}", engine.result());
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
