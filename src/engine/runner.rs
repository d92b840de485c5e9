//! Runs a workflow to completion on a pool of scoped worker threads.

use super::executor::{self, ExecutorEnv, Submission, SubmissionResult};
use super::optimizer::StrategyOptions;
use super::scheduler::WorkflowScheduler;
use super::ExecutionStrategy;
use crate::activity::{ActivityId, ActivityState};
use crate::config::EngineConfig;
use crate::dag::Workflow;
use crate::error::{ExecutionError, WorkflowError};
use crate::plan::{PlanInterpreter, QueryEngine};
use crate::storage::StorageManager;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, info_span};

/// Outcome of a single submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub root: ActivityId,
    pub activities: Vec<ActivityId>,
    pub strategy: ExecutionStrategy,
    pub error: Option<String>,
}

impl SubmissionReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// Submissions in the order they completed.
    pub submissions: Vec<SubmissionReport>,
    pub skipped: Vec<ActivityId>,
    pub failed: Vec<ActivityId>,
    pub interrupted: bool,
}

impl ExecutionSummary {
    /// True if nothing failed and the run was not interrupted. Skipped activities do not
    /// count as failures.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }

    pub fn submission_of(&self, id: ActivityId) -> Option<&SubmissionReport> {
        self.submissions.iter().find(|s| s.activities.contains(&id))
    }
}

/// Interrupts a running execution from another thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes workflows against a storage manager.
///
/// ```
/// use polyflow::prelude::*;
/// use std::sync::Arc;
///
/// let registry = ActivityRegistry::with_builtins().unwrap();
/// let mut workflow = Workflow::default();
/// let values = workflow.add_activity(&registry, "relValues").unwrap();
/// let limit = workflow.add_activity(&registry, "relLimit").unwrap();
/// workflow.connect(values, 0, limit, 0).unwrap();
///
/// let runner = WorkflowRunner::new(Arc::new(InMemoryStorage::new()), EngineConfig::default());
/// let summary = runner.run(&mut workflow, None).unwrap();
/// assert!(summary.is_success());
/// ```
pub struct WorkflowRunner {
    storage: Arc<dyn StorageManager>,
    engine: Arc<dyn QueryEngine>,
    config: EngineConfig,
    interrupt: Arc<AtomicBool>,
}

impl WorkflowRunner {
    pub fn new(storage: Arc<dyn StorageManager>, config: EngineConfig) -> Self {
        Self {
            storage,
            engine: Arc::new(PlanInterpreter),
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the engine that executes fused plans.
    pub fn with_query_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageManager> {
        &self.storage
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Executes `target` and the predecessors it needs, or every activity that is not saved.
    /// Returns once no submission is running anymore.
    pub fn run(
        &self,
        workflow: &mut Workflow,
        target: Option<ActivityId>,
    ) -> Result<ExecutionSummary, WorkflowError> {
        let span = info_span!("workflow_run", target = ?target);
        let _guard = span.enter();
        self.interrupt.store(false, Ordering::SeqCst);
        workflow.attach_storage(Arc::clone(&self.storage));

        let options = StrategyOptions {
            fusion: self.config.fusion_enabled && workflow.config().fusion_enabled,
            pipelining: self.config.pipelining_enabled && workflow.config().pipeline_enabled,
        };
        let workers = self
            .config
            .max_workers
            .min(workflow.config().max_workers)
            .max(1);
        let mut scheduler =
            WorkflowScheduler::new(workflow, target, self.storage.as_ref(), options, workers)?;
        let env = ExecutorEnv {
            storage: Arc::clone(&self.storage),
            engine: Arc::clone(&self.engine),
            interrupt: Arc::clone(&self.interrupt),
            pipe_capacity: self.config.pipe_queue_capacity,
            progress_interval: self.config.progress_interval,
        };

        let mut summary = ExecutionSummary::default();
        let (tx, rx) = crossbeam_channel::unbounded::<SubmissionResult>();
        thread::scope(|scope| -> Result<(), WorkflowError> {
            let mut next = scheduler.start_execution(workflow);
            loop {
                for plan in next.drain(..) {
                    let submission = Submission::prepare(workflow, plan)?;
                    let tx = tx.clone();
                    let env = &env;
                    scope.spawn(move || {
                        // The receiver lives until every worker reported back.
                        let _ = tx.send(executor::execute(submission, env));
                    });
                }
                if scheduler.pending() == 0 {
                    break;
                }
                let result = rx.recv().map_err(|_| {
                    ExecutionError::WorkerPanic("worker disconnected".to_string())
                })?;
                let SubmissionResult {
                    plan,
                    wrappers,
                    outcome,
                } = result;
                for wrapper in wrappers {
                    workflow.restore_activity(wrapper);
                }
                summary.submissions.push(SubmissionReport {
                    root: plan.root,
                    activities: plan.activities.clone(),
                    strategy: plan.strategy,
                    error: outcome.as_ref().err().map(|e| e.to_string()),
                });
                if self.interrupt.load(Ordering::SeqCst) {
                    scheduler.interrupt();
                }
                next = scheduler.handle_execution_result(workflow, &plan, &outcome)?;
            }
            Ok(())
        })?;

        summary.skipped = scheduler.skipped().to_vec();
        summary.failed = scheduler
            .execution_set()
            .iter()
            .copied()
            .filter(|id| {
                workflow
                    .activity(*id)
                    .is_some_and(|a| a.state() == ActivityState::Failed)
            })
            .collect();
        summary.failed.sort();
        summary.interrupted = scheduler.is_interrupted();
        info!(
            submissions = summary.submissions.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Workflow run finished"
        );
        Ok(summary)
    }
}
