//! Drives one run through a [`PipelineGraph`]
//!
//! The runner carries no retry counters and no knowledge of particular
//! stages. Feedback cycles are just edges; bounding them is up to the
//! stages involved (or the optional step fuse).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use scribe_core::{Result, ScribeError};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::context::RunContext;
use crate::graph::PipelineGraph;

/// Emitted after every stage invocation
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub run_id: Uuid,
    /// 1-based position in the run
    pub step: usize,
    pub stage: String,
    pub output: Artifact,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

/// Terminal output of a run plus its trail
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Stage that produced `output`
    pub final_stage: String,
    pub output: Artifact,
    pub events: Vec<StageEvent>,
    pub context: RunContext,
}

impl RunOutcome {
    pub fn steps(&self) -> usize {
        self.events.len()
    }

    /// How many times `stage` ran
    pub fn invocations(&self, stage: &str) -> usize {
        self.events.iter().filter(|e| e.stage == stage).count()
    }
}

/// Executes runs over a shared graph
#[derive(Clone)]
pub struct Runner {
    graph: Arc<PipelineGraph>,
    max_steps: Option<usize>,
    observer: Option<UnboundedSender<StageEvent>>,
}

impl Runner {
    pub fn new(graph: PipelineGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            max_steps: None,
            observer: None,
        }
    }

    /// Abort runs that invoke more than `max_steps` stages
    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Forward every stage event to `observer` as it happens
    pub fn with_observer(mut self, observer: UnboundedSender<StageEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Run from the entry stage with a fresh context
    pub async fn run(&self, input: Artifact, cancel: &CancellationToken) -> Result<RunOutcome> {
        self.run_with_context(input, RunContext::new(), cancel).await
    }

    /// Run from the entry stage with a caller-prepared context
    pub async fn run_with_context(
        &self,
        input: Artifact,
        mut ctx: RunContext,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let run_id = ctx.run_id();
        let mut current = self.graph.entry().to_string();
        let mut input = input;
        let mut events = Vec::new();

        info!("Run {} started at stage '{}'", run_id, current);

        loop {
            if cancel.is_cancelled() {
                info!("Run {} cancelled before stage '{}'", run_id, current);
                return Err(ScribeError::Cancelled);
            }

            let step = events.len() + 1;
            if let Some(max) = self.max_steps {
                if step > max {
                    warn!("Run {} hit the step limit of {}", run_id, max);
                    return Err(ScribeError::StepLimit(max));
                }
            }

            let stage = self.graph.stage(&current).ok_or_else(|| {
                ScribeError::InvalidGraph(format!("stage '{}' disappeared", current))
            })?;

            debug!("Step {}: invoking '{}' with {}", step, current, input.kind());
            let started = Instant::now();
            let output = match stage.invoke(input, &mut ctx, cancel).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Run {} failed at stage '{}': {}", run_id, current, e);
                    return Err(e);
                }
            };

            let event = StageEvent {
                run_id,
                step,
                stage: current.clone(),
                output: output.clone(),
                timestamp: Utc::now(),
                duration: started.elapsed(),
            };
            info!(
                "Step {}: '{}' produced {} in {:?}",
                step,
                current,
                output.kind(),
                event.duration
            );
            if let Some(observer) = &self.observer {
                // A dropped receiver only means nobody is watching
                let _ = observer.send(event.clone());
            }
            events.push(event);

            match self.graph.route(&current, &output)? {
                Some(next) => {
                    debug!("Routing '{}' -> '{}'", current, next);
                    current = next.to_string();
                    input = output;
                }
                None => {
                    info!("Run {} completed at '{}' after {} steps", run_id, current, step);
                    return Ok(RunOutcome {
                        run_id,
                        final_stage: current,
                        output,
                        events,
                        context: ctx,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::stage::Stage;
    use async_trait::async_trait;
    use scribe_core::{Presentation, ReviewDecision};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects until it has run `approve_after` times
    struct Gate {
        calls: AtomicUsize,
        approve_after: usize,
    }

    #[async_trait]
    impl Stage for Gate {
        fn id(&self) -> &str {
            "gate"
        }

        async fn invoke(
            &self,
            _input: Artifact,
            ctx: &mut RunContext,
            _cancel: &CancellationToken,
        ) -> Result<Artifact> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.increment("gate_calls");
            Ok(if n >= self.approve_after {
                ReviewDecision::approve("x", "ok").into()
            } else {
                ReviewDecision::reject("x", "again").into()
            })
        }
    }

    struct Finish;

    #[async_trait]
    impl Stage for Finish {
        fn id(&self) -> &str {
            "finish"
        }

        async fn invoke(
            &self,
            _input: Artifact,
            _ctx: &mut RunContext,
            _cancel: &CancellationToken,
        ) -> Result<Artifact> {
            Ok(Presentation {
                summary: "done".into(),
                formatted_result: "done".into(),
            }
            .into())
        }
    }

    struct Fails;

    #[async_trait]
    impl Stage for Fails {
        fn id(&self) -> &str {
            "fails"
        }

        async fn invoke(
            &self,
            _input: Artifact,
            _ctx: &mut RunContext,
            _cancel: &CancellationToken,
        ) -> Result<Artifact> {
            Err(ScribeError::stage("fails", "service unreachable"))
        }
    }

    fn approved(a: &Artifact) -> bool {
        a.as_review().is_some_and(|r| r.approved)
    }

    fn gate_runner(approve_after: usize) -> Runner {
        let graph = GraphBuilder::new("gate")
            .stage(Arc::new(Gate {
                calls: AtomicUsize::new(0),
                approve_after,
            }))
            .stage(Arc::new(Finish))
            .edge_when("gate", "gate", "rejected", |a| !approved(a))
            .edge_when("gate", "finish", "approved", approved)
            .build()
            .unwrap();
        Runner::new(graph)
    }

    #[tokio::test]
    async fn test_loops_until_guard_flips_then_terminates() {
        let runner = gate_runner(3);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = runner.with_observer(tx);

        let outcome = runner
            .run(Artifact::Request("go".into()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.final_stage, "finish");
        assert_eq!(outcome.invocations("gate"), 3);
        assert_eq!(outcome.invocations("finish"), 1);
        assert_eq!(outcome.steps(), 4);
        assert_eq!(outcome.context.get_as::<u64>("gate_calls").unwrap(), Some(3));
        assert!(outcome.output.into_presentation().is_some());

        let mut observed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            observed.push((event.step, event.stage));
        }
        assert_eq!(observed.len(), 4);
        assert_eq!(observed[3], (4, "finish".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_observer_does_not_fail_run() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let outcome = gate_runner(1)
            .with_observer(tx)
            .run(Artifact::Request("go".into()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.steps(), 2);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let err = gate_runner(100)
            .with_max_steps(Some(5))
            .run(Artifact::Request("go".into()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::StepLimit(5)));
    }

    #[tokio::test]
    async fn test_stage_error_propagates_unchanged() {
        let graph = GraphBuilder::new("fails")
            .stage(Arc::new(Fails))
            .build()
            .unwrap();
        let err = Runner::new(graph)
            .run(Artifact::Request("go".into()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Stage 'fails' failed: service unreachable");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gate_runner(1)
            .run(Artifact::Request("go".into()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
