//! Concurrency-limited script sandbox
//!
//! `execute` takes a permit from a fixed-size pool before doing any engine
//! work. The permit is an owned RAII guard, so it goes back to the pool on
//! every exit path: success, script failure, timeout, caller cancellation,
//! or the calling future being dropped.
//!
//! The engine cannot be pre-empted. When the deadline passes, the caller
//! gets `Timeout` and its permit back immediately while the engine thread
//! keeps running. The loop limit is counted per call frame, so a script
//! nesting loops across functions can outlive any deadline. Live engine
//! threads are therefore bounded by a second pool whose permit moves into
//! the thread and drops only when the thread exits. When that pool is empty
//! `execute` fails fast with `Unavailable` instead of spawning another.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scribe_core::{SandboxConfig, ScriptValue};
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CompileVerdict, ScriptCache};
use crate::engine::{Engine, EngineError};
use crate::error::SandboxError;

const ENGINE_THREAD_NAME: &str = "scribe-engine";
const ENGINE_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Value and timing of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSuccess {
    pub value: ScriptValue,
    /// Wall-clock time from slot acquisition to completion
    pub elapsed: Duration,
}

/// Runs untrusted JavaScript under a concurrency ceiling and a deadline
pub struct ScriptSandbox {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    engine_threads: Arc<Semaphore>,
    max_engine_threads: usize,
    max_execution_time: Duration,
    engine: Arc<Engine>,
    cache: Option<Arc<ScriptCache>>,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config
            .validate()
            .map_err(|e| SandboxError::Config(e.to_string()))?;

        let cache = config
            .enable_cache
            .then(|| Arc::new(ScriptCache::new(config.max_cache_size)));

        let max_engine_threads = config.engine_thread_limit();
        info!(
            "Script sandbox ready: {} slots, {} engine threads, {}ms limit, cache {}",
            config.max_concurrent_executions,
            max_engine_threads,
            config.max_execution_time_ms,
            if cache.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            max_concurrent: config.max_concurrent_executions,
            engine_threads: Arc::new(Semaphore::new(max_engine_threads)),
            max_engine_threads,
            max_execution_time: config.max_execution_time(),
            engine: Arc::new(Engine::new(&config)),
            cache,
        })
    }

    /// Slots currently free in the permit pool
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_execution_time(&self) -> Duration {
        self.max_execution_time
    }

    /// Engine threads still running, abandoned ones included
    pub fn live_engine_threads(&self) -> usize {
        self.max_engine_threads - self.engine_threads.available_permits()
    }

    pub fn max_engine_threads(&self) -> usize {
        self.max_engine_threads
    }

    /// Number of cached compile verdicts (0 when caching is off)
    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    /// Check that code compiles, without running it or taking a slot
    pub async fn validate(&self, code: &str) -> Result<(), SandboxError> {
        reject_blank(code)?;

        if let Some(verdict) = self.cached_verdict(code) {
            return verdict_to_result(verdict);
        }

        let engine = Arc::clone(&self.engine);
        let source = code.to_string();
        let diagnostics = tokio::task::spawn_blocking(move || engine.check_syntax(&source))
            .await
            .map_err(|e| SandboxError::Unavailable(format!("Syntax check failed: {}", e)))?;

        let verdict = CompileVerdict::rejected(diagnostics);
        self.record_verdict(code, verdict.clone());
        verdict_to_result(verdict)
    }

    /// Run code under the configured maximum execution time
    pub async fn execute(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSuccess, SandboxError> {
        self.execute_with_deadline(code, None, cancel).await
    }

    /// Run code under `min(deadline, max_execution_time)`
    pub async fn execute_with_deadline(
        &self,
        code: &str,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSuccess, SandboxError> {
        // Blank input never touches the permit pool
        reject_blank(code)?;

        let limit = deadline.map_or(self.max_execution_time, |d| d.min(self.max_execution_time));

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|_| SandboxError::Unavailable("permit pool closed".to_string()))?,
        };
        let started = Instant::now();

        let cached = self.cached_verdict(code);
        if let Some(verdict) = &cached {
            if !verdict.is_ok() {
                debug!("Compile verdict cache hit (rejected)");
                return Err(SandboxError::Compilation {
                    diagnostics: verdict.diagnostics.clone(),
                });
            }
            debug!("Compile verdict cache hit (compiled)");
        }
        let known_valid = cached.is_some();

        let thread_permit = Arc::clone(&self.engine_threads)
            .try_acquire_owned()
            .map_err(|_| {
                warn!(
                    "All {} engine threads busy, refusing to start another",
                    self.max_engine_threads
                );
                SandboxError::Unavailable(format!(
                    "all {} engine threads are still running earlier scripts",
                    self.max_engine_threads
                ))
            })?;

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let source = code.to_string();
        std::thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .stack_size(ENGINE_STACK_SIZE)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    engine.run(&source, known_valid)
                }))
                .unwrap_or_else(|_| {
                    Err(EngineError::Runtime("script engine panicked".to_string()))
                });
                // Released before the result is visible to the caller
                drop(thread_permit);
                // The receiver is gone if the caller timed out or was cancelled
                let _ = tx.send(outcome);
            })
            .map_err(|e| SandboxError::Unavailable(format!("Failed to start engine: {}", e)))?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Execution cancelled after {:?}", started.elapsed());
                return Err(SandboxError::Cancelled);
            }
            received = tokio::time::timeout(limit, rx) => match received {
                Err(_) => {
                    warn!("Execution timed out after {}ms", limit.as_millis());
                    return Err(SandboxError::Timeout { limit });
                }
                Ok(Err(_)) => {
                    return Err(SandboxError::Unavailable(
                        "engine thread exited without a result".to_string(),
                    ));
                }
                Ok(Ok(outcome)) => outcome,
            },
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                if !known_valid {
                    self.record_verdict(code, CompileVerdict::compiled());
                }
                debug!("Execution produced {} in {:?}", value.kind(), elapsed);
                Ok(ExecutionSuccess { value, elapsed })
            }
            Err(EngineError::Compilation(diagnostics)) => {
                self.record_verdict(code, CompileVerdict::rejected(diagnostics.clone()));
                Err(SandboxError::Compilation { diagnostics })
            }
            Err(EngineError::Runtime(message)) => {
                // A runtime fault still means the source compiled
                if !known_valid {
                    self.record_verdict(code, CompileVerdict::compiled());
                }
                Err(SandboxError::Runtime { message })
            }
        }
    }

    fn cached_verdict(&self, code: &str) -> Option<CompileVerdict> {
        self.cache.as_ref().and_then(|c| c.get(code))
    }

    fn record_verdict(&self, code: &str, verdict: CompileVerdict) {
        if let Some(cache) = &self.cache {
            cache.insert(code, verdict);
        }
    }
}

fn reject_blank(code: &str) -> Result<(), SandboxError> {
    if code.trim().is_empty() {
        return Err(SandboxError::InvalidInput(
            "code must not be empty or whitespace".to_string(),
        ));
    }
    Ok(())
}

fn verdict_to_result(verdict: CompileVerdict) -> Result<(), SandboxError> {
    if verdict.is_ok() {
        Ok(())
    } else {
        Err(SandboxError::Compilation {
            diagnostics: verdict.diagnostics,
        })
    }
}
