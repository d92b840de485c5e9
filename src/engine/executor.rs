//! Executes a single submission with the strategy chosen by the optimizer.

use super::context::{ActivityLog, ExecutionContext, FuseContext, PipeContext};
use super::optimizer::SubmissionPlan;
use super::pipe::{self, InputPipe, OutputPipe};
use super::ExecutionStrategy;
use crate::activity::{ActivityId, ActivityState, ActivityWrapper, Readers};
use crate::dag::{EdgeState, Workflow};
use crate::error::{ActivityError, ExecutionError, StorageError, WorkflowError};
use crate::model::ExecutionInfo;
use crate::plan::{CheckpointRef, PlanNode, QueryEngine};
use crate::storage::StorageManager;
use crate::types::TupleType;
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

/// Where a member reads one of its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberInput {
    None,
    Checkpoint(CheckpointRef),
    /// Output of the member at this index of the submission.
    Member(usize),
}

/// Everything shared by all submissions of a run.
pub(crate) struct ExecutorEnv {
    pub storage: Arc<dyn StorageManager>,
    pub engine: Arc<dyn QueryEngine>,
    pub interrupt: Arc<AtomicBool>,
    pub pipe_capacity: usize,
    pub progress_interval: u64,
}

/// A submission whose members were taken out of the workflow.
pub(crate) struct Submission {
    pub plan: SubmissionPlan,
    pub wrappers: Vec<ActivityWrapper>,
    pub inputs: Vec<Vec<MemberInput>>,
    pub info: ExecutionInfo,
}

pub(crate) struct SubmissionResult {
    pub plan: SubmissionPlan,
    pub wrappers: Vec<ActivityWrapper>,
    pub outcome: Result<(), ExecutionError>,
}

impl Submission {
    /// Resolves the inputs of every member and moves the members out of `workflow`.
    pub fn prepare(workflow: &mut Workflow, plan: SubmissionPlan) -> Result<Self, WorkflowError> {
        let mut inputs = Vec::with_capacity(plan.activities.len());
        for member in &plan.activities {
            let ports = workflow.get(*member)?.def().in_port_count();
            let member_inputs = (0..ports)
                .map(|port| match workflow.data_edge(*member, port) {
                    Some(edge) if plan.contains(edge.from()) => plan
                        .activities
                        .iter()
                        .position(|a| *a == edge.from())
                        .map_or(MemberInput::None, MemberInput::Member),
                    Some(edge) if edge.state() == EdgeState::Active => {
                        MemberInput::Checkpoint(CheckpointRef {
                            activity_id: edge.from(),
                            port: edge.from_port().unwrap_or_default(),
                        })
                    }
                    _ => MemberInput::None,
                })
                .collect();
            inputs.push(member_inputs);
        }
        let wrappers = plan
            .activities
            .iter()
            .map(|id| {
                workflow
                    .take_activity(*id)
                    .ok_or(WorkflowError::ActivityNotFound(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let info = ExecutionInfo::new(plan.strategy, plan.root, plan.activities.clone());
        Ok(Self {
            plan,
            wrappers,
            inputs,
            info,
        })
    }
}

/// Runs the submission. Panics of activities are turned into errors so the members always
/// come back to the caller.
pub(crate) fn execute(submission: Submission, env: &ExecutorEnv) -> SubmissionResult {
    let Submission {
        plan,
        mut wrappers,
        inputs,
        mut info,
    } = submission;
    info.started_at = Some(Utc::now());
    for wrapper in wrappers.iter_mut() {
        if let Err(e) = wrapper.set_state(ActivityState::Executing) {
            warn!(activity = %wrapper.id(), error = %e, "Unexpected state before execution");
        }
    }
    info!(root = %plan.root, strategy = %plan.strategy, members = plan.activities.len(), "Executing submission");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match plan.strategy {
        ExecutionStrategy::Default | ExecutionStrategy::VariableWriter => {
            execute_single(&mut wrappers, &inputs, plan.strategy, env, &mut info)
        }
        ExecutionStrategy::Fusion => execute_fused(&mut wrappers, &inputs, env, &mut info),
        ExecutionStrategy::Pipe => execute_piped(&mut wrappers, &inputs, env, &mut info),
    }))
    .unwrap_or_else(|payload| Err(ExecutionError::WorkerPanic(panic_message(payload))))
    .and_then(|()| check_outputs(&wrappers, env.storage.as_ref()));

    let root = plan.root;
    match &outcome {
        Ok(()) => {
            let ports = wrappers.last().map_or(0, |w| w.def().out_port_count());
            info.tuple_counts = (0..ports)
                .map(|port| env.storage.checkpoint_count(root, port).unwrap_or(-1))
                .collect();
            info.progress = 1.0;
        }
        Err(e) => {
            env.storage.drop_checkpoints(root);
            info.error = Some(e.to_string());
        }
    }
    info.finished_at = Some(Utc::now());
    debug!(root = %root, duration_ms = info.duration_millis(), success = outcome.is_ok(), "Submission finished");
    for wrapper in wrappers.iter_mut() {
        wrapper.set_execution_info(info.clone());
    }
    SubmissionResult {
        plan,
        wrappers,
        outcome,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "activity panicked".to_string())
}

fn check_outputs(
    wrappers: &[ActivityWrapper],
    storage: &dyn StorageManager,
) -> Result<(), ExecutionError> {
    let Some(root) = wrappers.last() else {
        return Ok(());
    };
    for port in 0..root.def().out_port_count() {
        if !storage.has_checkpoint(root.id(), port) {
            return Err(ExecutionError::MissingOutput {
                activity_id: root.id(),
                port,
            });
        }
    }
    Ok(())
}

fn activity_error(id: ActivityId) -> impl Fn(ActivityError) -> ExecutionError {
    move |source| ExecutionError::activity(id, source)
}

fn open_readers(
    inputs: &[MemberInput],
    storage: &dyn StorageManager,
) -> Result<Readers, StorageError> {
    inputs
        .iter()
        .map(|input| match input {
            MemberInput::Checkpoint(r) => storage.read_checkpoint(r.activity_id, r.port).map(Some),
            MemberInput::None | MemberInput::Member(_) => Ok(None),
        })
        .collect()
}

fn execute_single(
    wrappers: &mut [ActivityWrapper],
    inputs: &[Vec<MemberInput>],
    strategy: ExecutionStrategy,
    env: &ExecutorEnv,
    info: &mut ExecutionInfo,
) -> Result<(), ExecutionError> {
    let (Some(wrapper), Some(inputs)) = (wrappers.first_mut(), inputs.first()) else {
        return Err(ExecutionError::Plan("submission without activity".to_string()));
    };
    let id = wrapper.id();
    let settings = wrapper.resolve_settings().map_err(activity_error(id))?;
    let readers = open_readers(inputs, env.storage.as_ref())?;
    let mut ctx = ExecutionContext::new(
        id,
        Arc::clone(&env.storage),
        wrapper.variables().clone(),
        Arc::clone(&env.interrupt),
    )
    .with_progress_interval(env.progress_interval);

    let result = match strategy {
        ExecutionStrategy::VariableWriter => {
            wrapper.execute_with_variables(readers, &settings, &mut ctx)
        }
        _ => wrapper.execute(readers, &settings, &mut ctx),
    };
    info.progress = ctx.progress();
    info.logs.extend(ctx.into_log().into_entries());
    result.map_err(activity_error(id))
}

fn execute_fused(
    wrappers: &mut [ActivityWrapper],
    inputs: &[Vec<MemberInput>],
    env: &ExecutorEnv,
    info: &mut ExecutionInfo,
) -> Result<(), ExecutionError> {
    let storage = env.storage.as_ref();
    let mut fragments: Vec<Option<PlanNode>> = vec![None; wrappers.len()];
    for (index, wrapper) in wrappers.iter_mut().enumerate() {
        let id = wrapper.id();
        let settings = wrapper.resolve_settings().map_err(activity_error(id))?;
        let mut member_inputs = Vec::with_capacity(inputs[index].len());
        for input in &inputs[index] {
            member_inputs.push(match input {
                MemberInput::None => None,
                MemberInput::Checkpoint(r) => {
                    let tuple_type = storage.checkpoint_type(r.activity_id, r.port).ok_or(
                        StorageError::CheckpointNotFound {
                            activity_id: r.activity_id,
                            port: r.port,
                        },
                    )?;
                    Some(PlanNode::scan(*r, tuple_type))
                }
                MemberInput::Member(from) => fragments[*from].take(),
            });
        }
        let mut ctx = FuseContext::new(id);
        let fused = wrapper.fuse(member_inputs, &settings, &mut ctx);
        info.logs.extend(ctx.into_log().into_entries());
        fragments[index] = Some(fused.map_err(activity_error(id))?);
    }

    let (Some(root), Some(Some(plan))) = (wrappers.last(), fragments.pop()) else {
        return Err(ExecutionError::Plan("fusion produced no plan".to_string()));
    };
    debug!(root = %root.id(), "Fused plan:\n{}", plan.display());

    let rows = env.engine.execute(&plan, storage)?;
    let mut writer = storage.create_writer(root.id(), 0, plan.tuple_type().clone())?;
    let interval = env.progress_interval.max(1);
    for (i, row) in rows.enumerate() {
        if i as u64 % interval == 0 && env.interrupt.load(Ordering::Relaxed) {
            return Err(ExecutionError::Interrupted);
        }
        writer.write(row)?;
    }
    writer.close()?;
    Ok(())
}

struct MemberRun {
    result: Result<(), ExecutionError>,
    pipe_error: Option<StorageError>,
    root_output: Option<OutputPipe>,
    log: ActivityLog,
}

fn execute_piped(
    wrappers: &mut [ActivityWrapper],
    inputs: &[Vec<MemberInput>],
    env: &ExecutorEnv,
    info: &mut ExecutionInfo,
) -> Result<(), ExecutionError> {
    let storage = env.storage.as_ref();
    let count = wrappers.len();
    let root_index = count
        .checked_sub(1)
        .ok_or_else(|| ExecutionError::Plan("submission without activity".to_string()))?;

    // Types are locked in topological order so every member knows its input types.
    let mut locked: Vec<Option<TupleType>> = vec![None; count];
    let mut estimates: Vec<i64> = vec![-1; count];
    let mut settings = Vec::with_capacity(count);
    for (index, wrapper) in wrappers.iter_mut().enumerate() {
        let id = wrapper.id();
        let member_settings = wrapper.resolve_settings().map_err(activity_error(id))?;
        let (in_types, in_counts): (Vec<Option<TupleType>>, Vec<Option<i64>>) = inputs[index]
            .iter()
            .map(|input| match input {
                MemberInput::None => (None, None),
                MemberInput::Checkpoint(r) => (
                    storage.checkpoint_type(r.activity_id, r.port),
                    storage.checkpoint_count(r.activity_id, r.port),
                ),
                MemberInput::Member(from) => (
                    locked[*from].clone(),
                    Some(estimates[*from]).filter(|c| *c >= 0),
                ),
            })
            .unzip();
        locked[index] = Some(
            wrapper
                .lock_output_type(&in_types, &member_settings)
                .map_err(activity_error(id))?,
        );
        estimates[index] = wrapper.estimate_tuple_count(&in_types, &member_settings, &in_counts);
        settings.push(member_settings);
    }
    info.estimated_tuple_count = estimates[root_index];

    let mut outputs: Vec<Option<OutputPipe>> = (0..count).map(|_| None).collect();
    let mut member_inputs: Vec<Vec<Option<InputPipe>>> = Vec::with_capacity(count);
    for member in inputs {
        let mut pipes = Vec::with_capacity(member.len());
        for input in member {
            pipes.push(match input {
                MemberInput::None => None,
                MemberInput::Checkpoint(r) => Some(InputPipe::from_reader(
                    storage.read_checkpoint(r.activity_id, r.port)?,
                )),
                MemberInput::Member(from) => {
                    let tuple_type = locked[*from].clone().ok_or_else(|| {
                        ExecutionError::Plan("input type was not locked".to_string())
                    })?;
                    let (output, input) =
                        pipe::channel(env.pipe_capacity, tuple_type, Arc::clone(&env.interrupt));
                    outputs[*from] = Some(output);
                    Some(input)
                }
            });
        }
        member_inputs.push(pipes);
    }
    let root_id = wrappers[root_index].id();
    let root_type = locked[root_index]
        .clone()
        .ok_or_else(|| ExecutionError::Plan("output type was not locked".to_string()))?;
    outputs[root_index] = Some(OutputPipe::from_writer(
        storage.create_writer(root_id, 0, root_type)?,
        Arc::clone(&env.interrupt),
    ));
    let outputs = outputs
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ExecutionError::Plan("pipelined member without consumer".to_string()))?;

    let runs: Vec<MemberRun> = thread::scope(|scope| {
        let handles: Vec<_> = wrappers
            .iter_mut()
            .zip(member_inputs)
            .zip(outputs)
            .zip(settings.iter())
            .zip(estimates.iter().copied())
            .enumerate()
            .map(|(index, ((((wrapper, pipes), mut output), settings), estimate))| {
                let interrupt = Arc::clone(&env.interrupt);
                let interval = env.progress_interval;
                let id = wrapper.id();
                let handle = scope.spawn(move || {
                    let mut ctx = PipeContext::new(id, interrupt, estimate, interval);
                    let result = wrapper
                        .pipe(pipes, &mut output, settings, &mut ctx)
                        .map_err(activity_error(id));
                    let pipe_error = output.take_error();
                    // Dropping the output ends the input of the consumer.
                    let root_output = (index == root_index).then_some(output);
                    MemberRun {
                        result,
                        pipe_error,
                        root_output,
                        log: ctx.into_log(),
                    }
                });
                (id, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(id, handle)| {
                handle.join().unwrap_or_else(|payload| MemberRun {
                    result: Err(ExecutionError::WorkerPanic(panic_message(payload))),
                    pipe_error: None,
                    root_output: None,
                    log: ActivityLog::new(id),
                })
            })
            .collect()
    });

    let mut outcome = Ok(());
    let mut root_output = None;
    for run in runs {
        info.logs.extend(run.log.into_entries());
        if outcome.is_ok() {
            outcome = match (run.result, run.pipe_error) {
                (Err(e), _) => Err(e),
                (Ok(()), Some(e)) => Err(e.into()),
                (Ok(()), None) => Ok(()),
            };
        }
        if run.root_output.is_some() {
            root_output = run.root_output;
        }
    }
    outcome?;
    if env.interrupt.load(Ordering::Relaxed) {
        return Err(ExecutionError::Interrupted);
    }
    let root_output =
        root_output.ok_or_else(|| ExecutionError::Plan("root output was lost".to_string()))?;
    let written = root_output.close()?;
    debug!(root = %root_id, tuples = written, "Pipeline committed");
    Ok(())
}
