//! Execution engine: the timeout/cancellation wrapper shared by every backend.
//!
//! A [`ScriptEngine`] owns one backend, one output sink and a small worker
//! pool. Each [`ScriptEngine::run`] takes one of two paths:
//!
//! - **Safe path**: the backend's `execute` is handed to a pool worker and the
//!   caller waits at most the configured budget. On timeout the run's
//!   [`CancellationToken`] is cancelled and the worker is left detached.
//! - **Fast path**: once a script has run [`ExecutionPolicy::min_invocations`]
//!   times and its previous run finished under
//!   [`ExecutionPolicy::max_elapsed`], it runs directly on the caller's
//!   thread with no timeout.
//!
//! The fast path exists for the "one run per simulated event, millions of
//! events" workload, where dispatch overhead dominates a short script. It
//! trades the timeout guarantee for throughput and can be switched off.
//!
//! Nothing a script does surfaces as a host error: every run ends as a
//! success flag plus a result text.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use crate::config::ScriptingConfig;
use crate::error::{ScriptError, ScriptResult};
use crate::messages::{MessageCatalog, MessageId};
use crate::scripting::backend::BackendId;
use crate::scripting::output::SharedSink;
use crate::scripting::script_engine::{CancellationToken, ScriptBackend};

type SharedBackend = Arc<Mutex<Box<dyn ScriptBackend>>>;

/// How often `init_script` retries a backend held by a detached worker.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Timeout budget and fast-path thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Wall-clock budget for a safe-path run.
    pub timeout: Duration,
    /// Whether the fast path may be taken at all.
    pub fast_path_enabled: bool,
    /// Runs required before the fast path is considered.
    pub min_invocations: u64,
    /// The previous run must have finished strictly under this.
    pub max_elapsed: Duration,
}

impl ExecutionPolicy {
    /// Policy described by `config`.
    pub fn from_config(config: &ScriptingConfig) -> Self {
        Self {
            timeout: config.timeout(),
            fast_path_enabled: config.fast_path.enabled,
            min_invocations: config.fast_path.min_invocations,
            max_elapsed: Duration::from_millis(config.fast_path.max_elapsed_ms),
        }
    }

    /// Whether the next run may skip the pool.
    pub fn allows_fast_path(&self, invocation_count: u64, last_elapsed: Duration) -> bool {
        self.fast_path_enabled
            && invocation_count >= self.min_invocations
            && last_elapsed < self.max_elapsed
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::from_config(&ScriptingConfig::default())
    }
}

/// Outcome of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Completed without timeout and without an uncaught fault.
    pub success: bool,
    /// Captured output, or the error/timeout message.
    pub text: String,
}

enum Outcome {
    Finished(ScriptResult<()>),
    WorkerLost,
}

/// Runs a loaded script repeatedly on one backend.
///
/// Not meant to be driven from several threads at once; use one engine per
/// script attachment point.
pub struct ScriptEngine {
    backend: SharedBackend,
    backend_id: BackendId,
    sink: SharedSink,
    catalog: Arc<dyn MessageCatalog>,
    policy: ExecutionPolicy,
    pool: Option<Runtime>,
    script_loaded: bool,
    result: String,
    invocation_count: u64,
    last_elapsed: Duration,
}

impl ScriptEngine {
    /// Wrap an initialised backend. Used by the builder.
    pub(crate) fn new(
        backend: Box<dyn ScriptBackend>,
        sink: SharedSink,
        catalog: Arc<dyn MessageCatalog>,
        policy: ExecutionPolicy,
        worker_threads: usize,
        keep_alive: Duration,
    ) -> ScriptResult<Self> {
        let pool = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(worker_threads.max(1))
            .thread_keep_alive(keep_alive)
            .thread_name("script-worker")
            .build()?;

        Ok(Self {
            backend_id: backend.id(),
            backend: Arc::new(Mutex::new(backend)),
            sink,
            catalog,
            policy,
            pool: Some(pool),
            script_loaded: false,
            result: String::new(),
            invocation_count: 0,
            last_elapsed: Duration::ZERO,
        })
    }

    /// Load `source`, replacing any previous script.
    ///
    /// Returns `false` and stores the diagnostic as the result when the source
    /// does not compile; the previous script is unloaded either way. Counters
    /// restart so a new script earns the fast path on its own record.
    ///
    /// A detached worker that still holds the backend after one time budget
    /// makes this return `false` with the busy message and changes nothing.
    pub fn init_script(&mut self, source: &str) -> bool {
        let outcome = self
            .lock_backend(self.policy.timeout)
            .map(|mut backend| backend.init_script(source));
        let Some(outcome) = outcome else {
            warn!(backend = %self.backend_id, "Backend still held by a timed-out run");
            self.result = self.catalog.message(MessageId::EngineBusy, &[]);
            return false;
        };

        self.invocation_count = 0;
        self.last_elapsed = Duration::ZERO;
        match outcome {
            Ok(()) => {
                self.script_loaded = true;
                self.result.clear();
                debug!(backend = %self.backend_id, "Script loaded");
                true
            }
            Err(e) => {
                self.script_loaded = false;
                self.result = self
                    .catalog
                    .message(MessageId::CompileFailed, &[e.message().as_str()]);
                warn!(backend = %self.backend_id, error = %e, "Script failed to load");
                false
            }
        }
    }

    /// Run the loaded script once. See [`result`](Self::result) for the outcome text.
    pub fn run(&mut self) -> bool {
        if !self.script_loaded {
            self.result = self.catalog.message(MessageId::NoScriptLoaded, &[]);
            return false;
        }

        self.sink.reset();
        let start = Instant::now();
        let outcome = if self
            .policy
            .allows_fast_path(self.invocation_count, self.last_elapsed)
        {
            self.run_direct().unwrap_or_else(|| self.run_guarded())
        } else {
            self.run_guarded()
        };
        self.last_elapsed = start.elapsed();
        self.invocation_count = self.invocation_count.saturating_add(1);

        match outcome {
            Outcome::Finished(Ok(())) => {
                self.result = self.sink.results();
                true
            }
            Outcome::Finished(Err(ScriptError::Cancelled | ScriptError::Timeout { .. })) => {
                let budget = self.policy.timeout.as_millis().to_string();
                self.result = self
                    .catalog
                    .message(MessageId::ExecutionTimeout, &[budget.as_str()]);
                false
            }
            Outcome::Finished(Err(e)) => {
                debug!(backend = %self.backend_id, error = %e, "Script run failed");
                let message = self
                    .catalog
                    .message(MessageId::ExecutionFailed, &[e.message().as_str()]);
                self.sink.write_exception(&message);
                self.result = if self.sink.is_streaming() {
                    message
                } else {
                    self.sink.results()
                };
                false
            }
            Outcome::WorkerLost => {
                self.result = self.catalog.message(MessageId::WorkerLost, &[]);
                false
            }
        }
    }

    /// Text outcome of the most recent `run` or failed `init_script`.
    pub fn result(&self) -> &str {
        &self.result
    }

    /// Run once and return the outcome as a value.
    pub fn execute(&mut self) -> ExecutionResult {
        let success = self.run();
        ExecutionResult {
            success,
            text: self.result.clone(),
        }
    }

    /// Backend this engine runs on.
    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    /// Runs since the current script was loaded.
    pub fn invocation_count(&self) -> u64 {
        self.invocation_count
    }

    /// Wall-clock duration of the previous run.
    pub fn last_elapsed(&self) -> Duration {
        self.last_elapsed
    }

    /// Timeout and fast-path thresholds in effect.
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Backend lock, retried for at most `wait`. `None` while a detached
    /// worker still holds it.
    fn lock_backend(&self, wait: Duration) -> Option<MutexGuard<'_, Box<dyn ScriptBackend>>> {
        let deadline = Instant::now() + wait;
        loop {
            match self.backend.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(TryLockError::WouldBlock) => return None,
            }
        }
    }

    /// `None` when a detached worker still holds the backend.
    ///
    /// A panic is contained here the same way a panicking pool worker is.
    fn run_direct(&self) -> Option<Outcome> {
        let Some(mut backend) = self.lock_backend(Duration::ZERO) else {
            debug!(backend = %self.backend_id, "Backend busy; taking safe path");
            return None;
        };
        let cancel = CancellationToken::new();
        match panic::catch_unwind(AssertUnwindSafe(|| backend.execute(&cancel))) {
            Ok(result) => Some(Outcome::Finished(result)),
            Err(_) => {
                warn!(backend = %self.backend_id, "Script panicked on the caller's thread");
                Some(Outcome::WorkerLost)
            }
        }
    }

    fn run_guarded(&self) -> Outcome {
        let Some(pool) = self.pool.as_ref() else {
            return Outcome::WorkerLost;
        };

        let (tx, rx) = mpsc::channel();
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let shared = self.backend.clone();
        pool.spawn_blocking(move || {
            let mut backend = shared.lock().unwrap_or_else(PoisonError::into_inner);
            // The caller gave up while this worker waited for the backend.
            if worker_token.is_cancelled() {
                return;
            }
            let outcome = backend.execute(&worker_token);
            drop(backend);
            // The receiver is gone once the run timed out.
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.policy.timeout) {
            Ok(outcome) => Outcome::Finished(outcome),
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                warn!(
                    backend = %self.backend_id,
                    budget_ms = self.policy.timeout.as_millis() as u64,
                    "Script exceeded its time budget; worker detached"
                );
                Outcome::Finished(Err(ScriptError::Timeout {
                    budget_ms: self.policy.timeout.as_millis() as u64,
                }))
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(backend = %self.backend_id, "Script worker ended without a result");
                Outcome::WorkerLost
            }
        }
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("backend", &self.backend_id)
            .field("policy", &self.policy)
            .field("script_loaded", &self.script_loaded)
            .field("invocation_count", &self.invocation_count)
            .field("last_elapsed", &self.last_elapsed)
            .finish()
    }
}
