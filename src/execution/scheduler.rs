// Scheduler
// Drives the per-stage state machine Pending -> Ready -> Running ->
// {Succeeded, Failed, Skipped, Canceled}. Readiness is decided by runtime
// outcomes, not graph shape: a stage dispatches the instant every
// dependency succeeds, and failure propagates downstream as Skipped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::agent::pool::PoolSet;
use crate::agent::shell::ShellAgent;
use crate::agent::task::TaskRegistry;
use crate::agent::Agent;
use crate::error::{DefinitionError, RunError};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::executor::StageExecution;
use crate::execution::graph::ExecutionGraph;
use crate::execution::run::{RunHandle, RunRecord, RunStatus};
use crate::parser::models::Pipeline;
use crate::parser::validate::PipelineValidator;
use crate::variables::{builtin_variables, resolve_pipeline};

/// Tuning knobs for run execution.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity for pools without an explicit one (and the default pool)
    pub default_pool_capacity: usize,
    /// Applied to steps that declare no timeout of their own
    pub default_step_timeout: Option<Duration>,
    /// Initial working directory for every job
    pub workspace: std::path::PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_pool_capacity: 4,
            default_step_timeout: None,
            workspace: std::env::temp_dir(),
        }
    }
}

/// Per-run inputs: which branch triggered it, or `force` for manual runs
/// that bypass the trigger predicate.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub branch: Option<String>,
    pub force: bool,
}

/// Cancels whatever this scheduler has in flight: non-terminal stages
/// become Canceled and running jobs stop at their current step (best
/// effort, no rollback). A later `execute` call starts uncancelled.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Local dispatch state per stage. The record tree carries the public
/// statuses; this mirror avoids taking the run lock on every readiness
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done(RunStatus),
}

/// Validated, ready-to-execute pipeline.
///
/// Construction performs the full definition check (semantic validation
/// plus graph feasibility), so a scheduler in hand means the definition is
/// sound. One scheduler can execute any number of runs; the definition is
/// shared read-only across them.
pub struct PipelineScheduler {
    pipeline: Pipeline,
    graph: ExecutionGraph,
    config: Arc<SchedulerConfig>,
    registry: Arc<TaskRegistry>,
    agent: Option<Arc<dyn Agent>>,
    events: Option<ProgressSender>,
    cancel_tx: Arc<watch::Sender<bool>>,
    run_counter: AtomicU64,
}

impl fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("has_agent", &self.agent.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    /// Validate the pipeline against the built-in task registry.
    pub fn new(pipeline: Pipeline) -> Result<Self, DefinitionError> {
        Self::with_registry(pipeline, Arc::new(TaskRegistry::builtin()))
    }

    /// Validate the pipeline against a caller-supplied task registry.
    pub fn with_registry(
        pipeline: Pipeline,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, DefinitionError> {
        if let Err(mut errors) = PipelineValidator::validate(&pipeline, &registry) {
            return Err(errors.remove(0));
        }
        let graph = ExecutionGraph::build(&pipeline)?;
        let (cancel_tx, _) = watch::channel(false);

        Ok(Self {
            pipeline,
            graph,
            config: Arc::new(SchedulerConfig::default()),
            registry,
            agent: None,
            events: None,
            cancel_tx: Arc::new(cancel_tx),
            run_counter: AtomicU64::new(1),
        })
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replace the default shell agent, e.g. with a remote or mock agent.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel_tx))
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Execute one run to completion and return the handle onto its
    /// result tree.
    ///
    /// Fails before any stage starts on a rejected trigger or an
    /// unresolved variable; anything later is recorded on the result tree
    /// rather than returned as an error.
    pub async fn execute(&self, options: RunOptions) -> Result<RunHandle, RunError> {
        if !options.force {
            if let Some(branch) = &options.branch {
                if !self.pipeline.should_trigger(branch) {
                    return Err(RunError::TriggerRejected {
                        branch: branch.clone(),
                    });
                }
            }
        }

        let run_id = self.run_counter.fetch_add(1, Ordering::SeqCst);
        let builtins = builtin_variables(run_id, self.pipeline.display_name());
        let resolved = Arc::new(resolve_pipeline(&self.pipeline, &builtins)?);

        let run = RunHandle::new(RunRecord::new(run_id, &resolved, options.branch.clone()));

        let agent: Arc<dyn Agent> = match &self.agent {
            Some(agent) => Arc::clone(agent),
            None => Arc::new(ShellAgent::new(Arc::clone(&self.registry))?),
        };
        let pools = Arc::new(PoolSet::build(
            &resolved,
            self.config.default_pool_capacity,
            agent,
        ));

        // A fresh run starts uncancelled even if a previous run of this
        // scheduler was canceled.
        self.cancel_tx.send_replace(false);

        info!(run_id, pipeline = %resolved.display_name(), "run started");
        self.events.send_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: resolved.display_name().to_string(),
            total_stages: resolved.stages.len(),
        });

        self.drive(&resolved, run.clone(), pools).await;

        run.update(|record| record.finished_at = Some(SystemTime::now()));
        let status = run.status();
        let duration = run.snapshot().duration().unwrap_or_default();
        info!(run_id, ?status, "run completed");
        self.events.send_event(ExecutionEvent::RunCompleted {
            run_id,
            status,
            duration,
        });

        Ok(run)
    }

    /// The coordinator loop: propagate skips, dispatch ready stages in
    /// declaration order, then wait for a completion or a cancellation and
    /// go again, until every stage is terminal.
    async fn drive(&self, pipeline: &Arc<Pipeline>, run: RunHandle, pools: Arc<PoolSet>) {
        let total = pipeline.stages.len();
        let mut slots = vec![Slot::Pending; total];
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, RunStatus)>();
        let mut cancel_rx = self.cancel_tx.subscribe();

        loop {
            self.settle_pending(&mut slots, &run, *cancel_rx.borrow());

            for index in 0..total {
                if slots[index] != Slot::Pending || !self.is_ready(index, &slots) {
                    continue;
                }
                slots[index] = Slot::Running;
                self.dispatch(index, pipeline, &run, &pools, &done_tx, &cancel_rx);
            }

            let running = slots.iter().any(|s| *s == Slot::Running);
            let pending = slots.iter().any(|s| *s == Slot::Pending);
            if !running && !pending {
                break;
            }
            if !running {
                // Pending stages remain but none can become ready: only
                // reachable if settling missed something, so bail rather
                // than spin.
                debug!("no runnable stages remain; closing run");
                break;
            }

            tokio::select! {
                completed = done_rx.recv() => {
                    if let Some((index, status)) = completed {
                        debug!(stage = %self.graph.stages[index].name, ?status, "stage reached terminal status");
                        slots[index] = Slot::Done(status);
                    }
                }
                _ = cancel_rx.changed() => {
                    // Loop around; settle_pending sees the flag.
                }
            }
        }
    }

    /// Mark Pending stages whose fate is already decided: canceled runs
    /// cancel them, a dependency that ended without success skips them.
    /// Cascades until a fixpoint so transitive fallout settles in one call.
    fn settle_pending(&self, slots: &mut [Slot], run: &RunHandle, canceled: bool) {
        loop {
            let mut changed = false;

            for index in 0..slots.len() {
                if slots[index] != Slot::Pending {
                    continue;
                }

                if canceled {
                    slots[index] = Slot::Done(RunStatus::Canceled);
                    run.update(|record| {
                        record.canceled = true;
                        record.finalize_stage(index, RunStatus::Canceled, "run canceled");
                    });
                    self.events.send_event(ExecutionEvent::StageCompleted {
                        stage: self.graph.stages[index].name.clone(),
                        status: RunStatus::Canceled,
                    });
                    changed = true;
                    continue;
                }

                let unmet = self.graph.stages[index].depends_on.iter().find(|dep| {
                    self.graph
                        .stage_position(dep)
                        .map(|pos| matches!(slots[pos], Slot::Done(s) if s != RunStatus::Succeeded))
                        .unwrap_or(false)
                });

                if let Some(dep) = unmet {
                    let stage_name = self.graph.stages[index].name.clone();
                    let reason = format!("dependency '{}' did not succeed", dep);
                    info!(stage = %stage_name, %reason, "stage skipped");
                    slots[index] = Slot::Done(RunStatus::Skipped);
                    run.update(|record| {
                        record.finalize_stage(index, RunStatus::Skipped, &reason);
                    });
                    self.events.send_event(ExecutionEvent::StageSkipped {
                        stage: stage_name,
                        reason,
                    });
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    fn is_ready(&self, index: usize, slots: &[Slot]) -> bool {
        self.graph.stages[index].depends_on.iter().all(|dep| {
            self.graph
                .stage_position(dep)
                .map(|pos| slots[pos] == Slot::Done(RunStatus::Succeeded))
                .unwrap_or(false)
        })
    }

    /// Move one Ready stage to Running and spawn its execution. The record
    /// update and the StageStarted event happen here, synchronously, so
    /// dispatch order is exactly declaration order.
    fn dispatch(
        &self,
        index: usize,
        pipeline: &Arc<Pipeline>,
        run: &RunHandle,
        pools: &Arc<PoolSet>,
        done_tx: &mpsc::UnboundedSender<(usize, RunStatus)>,
        cancel_rx: &watch::Receiver<bool>,
    ) {
        let stage = pipeline.stages[index].clone();
        let stage_name = stage.stage.clone();
        info!(stage = %stage_name, "stage dispatched");

        run.update(|record| {
            let record = record.stage_mut(index);
            record.status = RunStatus::Running;
            record.started_at = Some(SystemTime::now());
        });
        self.events.send_event(ExecutionEvent::StageStarted {
            stage: stage_name.clone(),
        });

        let timeout = stage.timeout_in_minutes.map(|m| Duration::from_secs(m * 60));
        let execution = StageExecution {
            stage_index: index,
            stage,
            job_levels: self.graph.stages[index].job_levels(),
            pipeline_pool: pipeline.pool.clone(),
            pools: Arc::clone(pools),
            run: run.clone(),
            events: self.events.clone(),
            cancel: cancel_rx.clone(),
            config: Arc::clone(&self.config),
        };

        let run = run.clone();
        let events = self.events.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let status = match timeout {
                Some(limit) => match tokio::time::timeout(limit, execution.execute()).await {
                    Ok(status) => status,
                    Err(_) => {
                        let reason =
                            format!("stage timed out after {} seconds", limit.as_secs());
                        run.update(|record| {
                            record.finalize_stage(index, RunStatus::Failed, &reason);
                        });
                        events.send_event(ExecutionEvent::StageCompleted {
                            stage: stage_name,
                            status: RunStatus::Failed,
                        });
                        RunStatus::Failed
                    }
                },
                None => execution.execute().await,
            };
            let _ = done_tx.send((index, status));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::ScriptedAgent;

    fn scheduler_for(yaml: &str, agent: &ScriptedAgent) -> PipelineScheduler {
        let pipeline = crate::parser::parse_str(yaml).unwrap();
        PipelineScheduler::new(pipeline)
            .unwrap()
            .with_agent(Arc::new(agent.clone()))
    }

    async fn run_pipeline(yaml: &str) -> (RunHandle, ScriptedAgent) {
        let agent = ScriptedAgent::new();
        let scheduler = scheduler_for(yaml, &agent);
        let run = scheduler.execute(RunOptions::default()).await.unwrap();
        (run, agent)
    }

    const LINEAR: &str = r#"
name: linear
stages:
  - stage: Build
    jobs:
      - job: B
        steps: [{script: build}]
  - stage: Test
    dependsOn: Build
    jobs:
      - job: T
        steps: [{script: test}]
  - stage: Deploy
    dependsOn: Test
    jobs:
      - job: D
        steps: [{script: deploy}]
"#;

    #[tokio::test]
    async fn linear_pipeline_succeeds_end_to_end() {
        let (run, agent) = run_pipeline(LINEAR).await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        let snapshot = run.snapshot();
        assert!(snapshot
            .stages
            .iter()
            .all(|s| s.status == RunStatus::Succeeded));
        assert_eq!(agent.log(), vec!["build", "test", "deploy"]);
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.stages[0].started_at.is_some());
    }

    #[tokio::test]
    async fn failure_fails_the_stage_and_skips_downstream() {
        let yaml = LINEAR.replace("script: test", "script: fail test");
        let (run, agent) = run_pipeline(&yaml).await;

        assert_eq!(run.status(), RunStatus::Failed);
        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[0].status, RunStatus::Succeeded);
        assert_eq!(snapshot.stages[1].status, RunStatus::Failed);
        assert_eq!(snapshot.stages[2].status, RunStatus::Skipped);

        // Deploy never reached the agent.
        assert_eq!(agent.log(), vec!["build", "fail test"]);

        let report = run.first_failure().unwrap();
        assert_eq!(report.stage, "Test");
        assert_eq!(report.job.as_deref(), Some("T"));
        assert_eq!(report.reason, "exited with code 1");
        assert_eq!(report.skipped_stages, vec!["Deploy".to_string()]);
    }

    #[tokio::test]
    async fn skip_cascades_through_the_whole_downstream_chain() {
        let yaml = LINEAR.replace("script: build", "script: fail build");
        let (run, _) = run_pipeline(&yaml).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[1].status, RunStatus::Skipped);
        assert_eq!(snapshot.stages[2].status, RunStatus::Skipped);
        assert_eq!(
            snapshot.stages[1].reason.as_deref(),
            Some("dependency 'Build' did not succeed")
        );
        // Skipped stages close their children too.
        assert_eq!(snapshot.stages[1].jobs[0].status, RunStatus::Skipped);
        assert_eq!(
            snapshot.stages[1].jobs[0].steps[0].status,
            RunStatus::Skipped
        );
    }

    #[tokio::test]
    async fn pipeline_variables_reach_step_scripts() {
        let (_, agent) = run_pipeline(
            r#"
variables:
  tag: v1
stages:
  - stage: Build
    jobs:
      - job: B
        steps:
          - script: image:$(tag)
"#,
        )
        .await;
        assert_eq!(agent.log(), vec!["image:v1"]);
    }

    #[tokio::test]
    async fn independent_jobs_both_run_and_gate_the_stage() {
        let (run, agent) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs:
      - job: A
        steps: [{script: job-a}]
      - job: B
        steps: [{script: job-b}]
"#,
        )
        .await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        let mut log = agent.log();
        log.sort();
        assert_eq!(log, vec!["job-a", "job-b"]);

        // One failing job fails the whole stage: all-or-nothing.
        let (run, _) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs:
      - job: A
        steps: [{script: job-a}]
      - job: B
        steps: [{script: fail job-b}]
"#,
        )
        .await;
        assert_eq!(run.status(), RunStatus::Failed);
        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[0].jobs[0].status, RunStatus::Succeeded);
        assert_eq!(snapshot.stages[0].jobs[1].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn dependent_jobs_run_in_order() {
        let (_, agent) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs:
      - job: Second
        dependsOn: First
        steps: [{script: second}]
      - job: First
        steps: [{script: first}]
"#,
        )
        .await;
        assert_eq!(agent.log(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn a_failed_job_skips_later_job_levels() {
        let (run, agent) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs:
      - job: First
        steps: [{script: fail first}]
      - job: Second
        dependsOn: First
        steps: [{script: second}]
"#,
        )
        .await;

        assert_eq!(agent.log(), vec!["fail first"]);
        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[0].jobs[1].status, RunStatus::Skipped);
        assert_eq!(
            snapshot.stages[0].jobs[1].reason.as_deref(),
            Some("job 'First' failed earlier in the stage")
        );
    }

    #[tokio::test]
    async fn unknown_dependency_is_rejected_before_anything_runs() {
        let pipeline = crate::parser::parse_str(
            r#"
stages:
  - stage: Test
    dependsOn: [NonExistentStage]
    jobs: [{job: T, steps: [{script: echo}]}]
"#,
        )
        .unwrap();
        let err = PipelineScheduler::new(pipeline).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UnknownDependency { dependency, .. }
                if dependency == "NonExistentStage"
        ));
    }

    #[tokio::test]
    async fn cyclic_dependencies_are_rejected_before_anything_runs() {
        let pipeline = crate::parser::parse_str(
            r#"
stages:
  - stage: A
    dependsOn: B
    jobs: [{job: J, steps: [{script: echo}]}]
  - stage: B
    dependsOn: A
    jobs: [{job: J, steps: [{script: echo}]}]
"#,
        )
        .unwrap();
        assert!(matches!(
            PipelineScheduler::new(pipeline).unwrap_err(),
            DefinitionError::CyclicDependency { .. }
        ));
    }

    #[tokio::test]
    async fn unresolved_variable_fails_before_any_stage_starts() {
        let agent = ScriptedAgent::new();
        let scheduler = scheduler_for(
            r#"
stages:
  - stage: Build
    jobs:
      - job: B
        steps: [{script: echo $(missing)}]
"#,
            &agent,
        );

        let err = scheduler.execute(RunOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::UnresolvedVariable(ref e) if e.name == "missing"
        ));
        assert!(agent.log().is_empty());
    }

    #[tokio::test]
    async fn trigger_gates_runs_unless_forced() {
        let agent = ScriptedAgent::new();
        let scheduler = scheduler_for(
            r#"
trigger: [main]
stages:
  - stage: Build
    jobs: [{job: B, steps: [{script: build}]}]
"#,
            &agent,
        );

        let err = scheduler
            .execute(RunOptions {
                branch: Some("feature/x".to_string()),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::TriggerRejected { .. }));
        assert!(agent.log().is_empty());

        let run = scheduler
            .execute(RunOptions {
                branch: Some("feature/x".to_string()),
                force: true,
            })
            .await
            .unwrap();
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.snapshot().branch.as_deref(), Some("feature/x"));
    }

    #[tokio::test]
    async fn ready_stages_dispatch_in_declaration_order() {
        let agent = ScriptedAgent::new();
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let scheduler = scheduler_for(
            r#"
stages:
  - stage: Zeta
    jobs: [{job: J, steps: [{script: z}]}]
  - stage: Alpha
    jobs: [{job: J, steps: [{script: a}]}]
"#,
            &agent,
        )
        .with_progress(tx);

        scheduler.execute(RunOptions::default()).await.unwrap();

        let mut started = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::StageStarted { stage } = event {
                started.push(stage);
            }
        }
        assert_eq!(started, vec!["Zeta".to_string(), "Alpha".to_string()]);
    }

    #[tokio::test]
    async fn optional_stage_failure_keeps_the_run_green() {
        let (run, _) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs: [{job: B, steps: [{script: build}]}]
  - stage: Canary
    optional: true
    jobs: [{job: C, steps: [{script: fail canary}]}]
"#,
        )
        .await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[1].status, RunStatus::Failed);
        assert_eq!(run.status(), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn optional_stage_failure_still_skips_dependents() {
        let (run, _) = run_pipeline(
            r#"
stages:
  - stage: Canary
    optional: true
    jobs: [{job: C, steps: [{script: fail canary}]}]
  - stage: Promote
    dependsOn: Canary
    jobs: [{job: P, steps: [{script: promote}]}]
"#,
        )
        .await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[1].status, RunStatus::Skipped);
        // A required stage was skipped as fallout, so the finished run is
        // not a success.
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_reaches_running_and_pending_stages() {
        let agent = ScriptedAgent::new();
        let scheduler = Arc::new(scheduler_for(
            r#"
stages:
  - stage: Slow
    jobs:
      - job: J
        steps: [{script: sleep 5000}]
  - stage: After
    dependsOn: Slow
    jobs: [{job: A, steps: [{script: after}]}]
"#,
            &agent,
        ));

        let cancel = scheduler.cancel_handle();
        let task = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.execute(RunOptions::default()).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let run = task.await.unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Canceled);

        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[0].status, RunStatus::Canceled);
        assert_eq!(snapshot.stages[1].status, RunStatus::Canceled);
        assert_eq!(
            snapshot.stages[0].jobs[0].steps[0].reason.as_deref(),
            Some("run canceled")
        );
        // "after" never ran.
        assert_eq!(agent.log(), vec!["sleep 5000"]);
    }

    #[tokio::test]
    async fn diamond_waits_for_every_dependency() {
        let (run, agent) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs: [{job: J, steps: [{script: build}]}]
  - stage: UnitTest
    dependsOn: Build
    jobs: [{job: J, steps: [{script: unit}]}]
  - stage: IntegrationTest
    dependsOn: Build
    jobs: [{job: J, steps: [{script: integration}]}]
  - stage: Deploy
    dependsOn: [UnitTest, IntegrationTest]
    jobs: [{job: J, steps: [{script: deploy}]}]
"#,
        )
        .await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        let log = agent.log();
        assert_eq!(log.first().map(String::as_str), Some("build"));
        assert_eq!(log.last().map(String::as_str), Some("deploy"));
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn task_steps_dispatch_through_the_agent() {
        let (run, agent) = run_pipeline(
            r#"
stages:
  - stage: Build
    jobs:
      - job: B
        steps:
          - task: CmdLine@2
            inputs: {script: packaged}
"#,
        )
        .await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(agent.log(), vec!["task:CmdLine@2"]);
    }

    #[tokio::test]
    async fn run_ids_are_distinct_and_visible_to_steps() {
        let agent = ScriptedAgent::new();
        let scheduler = scheduler_for(
            r#"
stages:
  - stage: Build
    jobs: [{job: B, steps: [{script: run=$(run.id)}]}]
"#,
            &agent,
        );

        let first = scheduler.execute(RunOptions::default()).await.unwrap();
        let second = scheduler.execute(RunOptions::default()).await.unwrap();

        assert_ne!(first.snapshot().id, second.snapshot().id);
        assert_eq!(agent.log(), vec!["run=1", "run=2"]);
    }
}
