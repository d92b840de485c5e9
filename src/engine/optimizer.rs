//! Chooses execution strategies and groups queued activities into submissions.

use super::ExecutionStrategy;
use crate::activity::{ActivityId, ActivityWrapper};
use crate::dag::{Edge, EdgeState, Workflow};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Strategies the runner permits for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyOptions {
    pub fusion: bool,
    pub pipelining: bool,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            fusion: true,
            pipelining: true,
        }
    }
}

/// A group of activities executed together. The root is the only member whose outputs
/// are materialized, every other member feeds exactly one other member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPlan {
    pub root: ActivityId,
    /// Members in topological order. The root is last.
    pub activities: Vec<ActivityId>,
    pub strategy: ExecutionStrategy,
}

impl SubmissionPlan {
    pub fn contains(&self, id: ActivityId) -> bool {
        self.activities.contains(&id)
    }
}

/// Decides how a single activity would like to be executed.
///
/// Variable writers always run on their own. As long as an activity cannot tell whether it
/// writes variables it falls back to the default strategy.
pub(crate) fn choose_strategy(
    wrapper: &mut ActivityWrapper,
    options: StrategyOptions,
) -> ExecutionStrategy {
    match wrapper.requests_variable_write() {
        Some(true) => return ExecutionStrategy::VariableWriter,
        None => return ExecutionStrategy::Default,
        Some(false) => {}
    }
    if options.fusion && wrapper.can_fuse() == Some(true) {
        ExecutionStrategy::Fusion
    } else if options.pipelining && wrapper.can_pipe() == Some(true) {
        ExecutionStrategy::Pipe
    } else {
        ExecutionStrategy::Default
    }
}

/// Every submission among `queued` that could start right now.
pub(crate) fn ready_submissions(
    workflow: &mut Workflow,
    queued: &AHashSet<ActivityId>,
    options: StrategyOptions,
) -> Vec<SubmissionPlan> {
    let order = match workflow.topological_order(Some(queued)) {
        Ok(order) => order,
        Err(e) => {
            warn!(error = %e, "Unable to order queued activities");
            return Vec::new();
        }
    };
    let strategies: AHashMap<ActivityId, ExecutionStrategy> = order
        .iter()
        .filter_map(|id| {
            workflow
                .activity_mut(*id)
                .map(|w| (*id, choose_strategy(w, options)))
        })
        .collect();

    let successors = absorbed_successors(workflow, &order, queued, &strategies);
    let root_of = |mut id: ActivityId| {
        while let Some(next) = successors.get(&id) {
            id = *next;
        }
        id
    };
    let mut members: AHashMap<ActivityId, Vec<ActivityId>> = AHashMap::new();
    for id in &order {
        members.entry(root_of(*id)).or_default().push(*id);
    }

    order
        .iter()
        .filter(|id| !successors.contains_key(*id) && strategies.contains_key(*id))
        .filter_map(|root| {
            let plan = SubmissionPlan {
                root: *root,
                activities: members.remove(root).unwrap_or_default(),
                strategy: strategies[root],
            };
            is_ready(workflow, &plan).then_some(plan)
        })
        .inspect(|plan| {
            trace!(root = %plan.root, members = plan.activities.len(), strategy = %plan.strategy, "Submission ready")
        })
        .collect()
}

/// Maps every activity that joins the submission of its successor to that successor.
fn absorbed_successors(
    workflow: &Workflow,
    order: &[ActivityId],
    queued: &AHashSet<ActivityId>,
    strategies: &AHashMap<ActivityId, ExecutionStrategy>,
) -> AHashMap<ActivityId, ActivityId> {
    let mut successors = AHashMap::new();
    for id in order {
        let Some(strategy) = strategies.get(id) else {
            continue;
        };
        if !matches!(strategy, ExecutionStrategy::Fusion | ExecutionStrategy::Pipe) {
            continue;
        }
        let out = workflow.out_edges(*id);
        let [edge] = out.as_slice() else {
            continue;
        };
        let target = edge.to();
        let enforced = workflow
            .activity(*id)
            .is_none_or(|w| w.config().enforce_checkpoint);
        if !edge.is_data()
            || enforced
            || !queued.contains(&target)
            || strategies.get(&target) != Some(strategy)
            || workflow.in_edges(target).iter().any(|e| e.is_control())
        {
            continue;
        }
        successors.insert(*id, target);
    }
    successors
}

/// A submission is ready once its external inputs are resolved and every member would
/// execute, counting edges between members as active.
fn is_ready(workflow: &Workflow, plan: &SubmissionPlan) -> bool {
    for member in &plan.activities {
        let Some(wrapper) = workflow.activity(*member) else {
            return false;
        };
        let in_edges: Vec<Edge> = workflow
            .in_edges(*member)
            .into_iter()
            .map(|e| {
                let mut edge = e.clone();
                if plan.contains(e.from()) {
                    edge.set_state(EdgeState::Active);
                }
                edge
            })
            .collect();
        if in_edges.iter().any(|e| !e.is_resolved()) {
            return false;
        }
        let refs: Vec<&Edge> = in_edges.iter().collect();
        if wrapper.can_execute(&refs) != EdgeState::Active {
            return false;
        }
    }
    true
}
