//! Tracks the progress of a workflow execution and decides what to submit next.

use super::optimizer::{self, StrategyOptions, SubmissionPlan};
use crate::activity::{ActivityId, ActivityState};
use crate::dag::{EdgeState, Workflow};
use crate::error::{ExecutionError, WorkflowError};
use crate::storage::StorageManager;
use ahash::AHashSet;
use itertools::Itertools;
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Drives one execution of a workflow.
///
/// Activities of the execution are queued on construction. Every call to
/// [`WorkflowScheduler::start_execution`] or [`WorkflowScheduler::handle_execution_result`]
/// returns the submissions that may start now, never more than there are free workers.
#[derive(Debug)]
pub struct WorkflowScheduler {
    executed: AHashSet<ActivityId>,
    remaining: AHashSet<ActivityId>,
    skipped: Vec<ActivityId>,
    pending: usize,
    max_workers: usize,
    options: StrategyOptions,
    interrupted: bool,
    finished: bool,
}

impl WorkflowScheduler {
    /// Prepares the execution of `target` and its non-saved predecessors, or of every
    /// activity that is not saved.
    pub fn new(
        workflow: &mut Workflow,
        target: Option<ActivityId>,
        storage: &dyn StorageManager,
        options: StrategyOptions,
        max_workers: usize,
    ) -> Result<Self, WorkflowError> {
        if workflow
            .activities()
            .any(|a| a.state() == ActivityState::Executing)
        {
            return Err(WorkflowError::AlreadyExecuting);
        }
        let (executed, saved) = execution_subgraph(workflow, target)?;

        // Anything downstream of a re-executed activity is outdated.
        let mut outdated = AHashSet::new();
        for id in &executed {
            outdated.extend(workflow.reachable(*id));
        }
        for id in outdated.iter().sorted() {
            if let Some(wrapper) = workflow.activity_mut(*id) {
                wrapper.reset_execution();
            }
            storage.drop_checkpoints(*id);
        }
        for index in 0..workflow.edges().len() {
            if let Some(edge) = workflow.edge_mut(index) {
                if outdated.contains(&edge.to()) {
                    edge.reset_execution();
                }
            }
        }

        let mut checked = executed.clone();
        checked.extend(saved.iter().copied());
        workflow.validate_structure(&checked, storage)?;

        for id in executed.iter().sorted() {
            workflow.get_mut(*id)?.set_state(ActivityState::Queued)?;
        }
        let mut scheduler = Self {
            executed: executed.clone(),
            remaining: executed,
            skipped: Vec::new(),
            pending: 0,
            max_workers: max_workers.max(1),
            options,
            interrupted: false,
            finished: false,
        };
        for id in workflow.topological_order(Some(&saved))? {
            scheduler.update_graph(workflow, true, &[id], id, true)?;
        }
        for id in workflow.topological_order(Some(&scheduler.executed))? {
            workflow.update_preview(id);
        }
        info!(
            activities = scheduler.executed.len(),
            saved = saved.len(),
            "Prepared workflow execution"
        );
        Ok(scheduler)
    }

    /// Submissions that can start right away.
    pub fn start_execution(&mut self, workflow: &mut Workflow) -> Vec<SubmissionPlan> {
        self.next_submissions(workflow)
    }

    /// Records the outcome of a submission and returns what may start next.
    pub fn handle_execution_result(
        &mut self,
        workflow: &mut Workflow,
        plan: &SubmissionPlan,
        outcome: &Result<(), ExecutionError>,
    ) -> Result<Vec<SubmissionPlan>, WorkflowError> {
        self.pending = self.pending.saturating_sub(1);
        if let Err(e) = outcome {
            warn!(root = %plan.root, error = %e, "Submission failed");
            for id in &plan.activities {
                let wrapper = workflow.get_mut(*id)?;
                if plan.activities.len() > 1 {
                    wrapper.set_rolled_back(true);
                }
                wrapper
                    .variables_mut()
                    .set_error(json!({ "message": e.to_string(), "activity": id.to_string() }));
            }
        }
        self.update_graph(workflow, outcome.is_ok(), &plan.activities, plan.root, false)?;
        Ok(self.next_submissions(workflow))
    }

    /// Stops submitting. Queued activities are skipped once running submissions returned.
    pub fn interrupt(&mut self) {
        if !self.interrupted {
            info!("Workflow execution interrupted");
        }
        self.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// True once no submission is running and nothing is left to submit.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Activities of this execution, including the ones already finished.
    pub fn execution_set(&self) -> &AHashSet<ActivityId> {
        &self.executed
    }

    pub fn skipped(&self) -> &[ActivityId] {
        &self.skipped
    }

    fn next_submissions(&mut self, workflow: &mut Workflow) -> Vec<SubmissionPlan> {
        if self.finished {
            return Vec::new();
        }
        let mut plans = Vec::new();
        if !self.interrupted {
            let free = self.max_workers.saturating_sub(self.pending);
            if free > 0 && !self.remaining.is_empty() {
                plans = optimizer::ready_submissions(workflow, &self.remaining, self.options);
                plans.truncate(free);
            }
        }
        for plan in &plans {
            for id in &plan.activities {
                self.remaining.remove(id);
            }
        }
        self.pending += plans.len();

        if self.pending == 0 {
            if !self.remaining.is_empty() {
                if !self.interrupted {
                    warn!(
                        remaining = self.remaining.len(),
                        "No queued activity can be executed"
                    );
                }
                self.skip_remaining(workflow);
            }
            self.finished = true;
            debug!(skipped = self.skipped.len(), "Workflow execution finished");
        }
        plans
    }

    fn skip_remaining(&mut self, workflow: &mut Workflow) {
        for id in self.remaining.drain().sorted() {
            if let Some(wrapper) = workflow.activity_mut(id) {
                if let Err(e) = wrapper.set_state(ActivityState::Skipped) {
                    warn!(activity = %id, error = %e, "Unable to skip activity");
                }
            }
            self.skipped.push(id);
        }
    }

    /// Applies the outcome of `members` to the graph. With `initial` the members are saved
    /// activities whose states are kept.
    fn update_graph(
        &mut self,
        workflow: &mut Workflow,
        success: bool,
        members: &[ActivityId],
        root: ActivityId,
        initial: bool,
    ) -> Result<(), WorkflowError> {
        for id in members {
            if !initial {
                let state = match (success, *id == root) {
                    (true, true) => ActivityState::Saved,
                    (true, false) => ActivityState::Finished,
                    (false, _) => ActivityState::Failed,
                };
                workflow.get_mut(*id)?.set_state(state)?;
            }
            for index in workflow.out_edge_indices(*id) {
                let Some(edge) = workflow.edge(index) else {
                    continue;
                };
                if members.contains(&edge.to()) {
                    let state = if success {
                        EdgeState::Active
                    } else {
                        EdgeState::Inactive
                    };
                    if let Some(edge) = workflow.edge_mut(index) {
                        edge.set_state(state);
                    }
                    continue;
                }
                let active = match edge.on_success() {
                    Some(on_success) => on_success == success,
                    None => success,
                };
                self.propagate_result(workflow, active, index)?;
            }
        }

        let mut affected = AHashSet::new();
        for id in members {
            affected.extend(
                workflow
                    .reachable(*id)
                    .into_iter()
                    .filter(|a| self.remaining.contains(a)),
            );
        }
        for id in workflow.topological_order(Some(&affected))? {
            workflow.update_preview(id);
        }
        Ok(())
    }

    /// Sets the state of the edge at `index` and decides whether its target can still run.
    /// Targets that can no longer run are skipped, which in turn deactivates their outputs.
    fn propagate_result(
        &mut self,
        workflow: &mut Workflow,
        active: bool,
        index: usize,
    ) -> Result<(), WorkflowError> {
        let mut queue = VecDeque::from([(index, active)]);
        while let Some((index, active)) = queue.pop_front() {
            let Some(edge) = workflow.edge_mut(index) else {
                continue;
            };
            edge.set_state(if active {
                EdgeState::Active
            } else {
                EdgeState::Inactive
            });
            let target = edge.to();
            if edge.is_ignored() || (active && edge.is_data()) || !self.remaining.contains(&target)
            {
                continue;
            }
            let decision = {
                let wrapper = workflow.get(target)?;
                wrapper.can_execute(&workflow.in_edges(target))
            };
            match decision {
                EdgeState::Idle => {}
                EdgeState::Active => {
                    for in_index in workflow.in_edge_indices(target) {
                        if let Some(in_edge) = workflow.edge_mut(in_index) {
                            if in_edge.is_control() && !in_edge.is_resolved() {
                                in_edge.set_ignored(true);
                            }
                        }
                    }
                }
                EdgeState::Inactive => {
                    debug!(activity = %target, "Skipping activity");
                    workflow.get_mut(target)?.set_state(ActivityState::Skipped)?;
                    self.remaining.remove(&target);
                    self.skipped.push(target);
                    queue.extend(
                        workflow
                            .out_edge_indices(target)
                            .into_iter()
                            .map(|out| (out, false)),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Activities to execute and the saved activities their inputs come from. Saved activities
/// that depend on an executed activity are outdated and executed again.
fn execution_subgraph(
    workflow: &Workflow,
    target: Option<ActivityId>,
) -> Result<(AHashSet<ActivityId>, AHashSet<ActivityId>), WorkflowError> {
    let mut executed = AHashSet::new();
    let mut saved = AHashSet::new();
    let mut forced: AHashSet<ActivityId> = target.into_iter().collect();
    let mut queue: VecDeque<ActivityId> = match target {
        Some(id) => {
            workflow.get(id)?;
            VecDeque::from([id])
        }
        // Finished activities only run again if a successor needs their output.
        None => workflow
            .activity_ids()
            .into_iter()
            .filter(|id| workflow.activity(*id).is_some_and(|a| !a.state().is_success()))
            .collect(),
    };
    loop {
        while let Some(id) = queue.pop_front() {
            if executed.contains(&id) || saved.contains(&id) {
                continue;
            }
            if workflow.get(id)?.state() == ActivityState::Saved && !forced.contains(&id) {
                saved.insert(id);
                continue;
            }
            executed.insert(id);
            queue.extend(workflow.in_edges(id).iter().map(|e| e.from()));
        }
        let mut outdated = AHashSet::new();
        for id in &executed {
            outdated.extend(workflow.reachable(*id));
        }
        let stale: Vec<ActivityId> = saved.intersection(&outdated).copied().collect();
        if stale.is_empty() {
            return Ok((executed, saved));
        }
        for id in stale {
            saved.remove(&id);
            forced.insert(id);
            queue.push_back(id);
        }
    }
}
