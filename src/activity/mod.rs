//! The activity contract and its optional capabilities.
//!
//! Every activity implements [`Activity`]. Activities that can do more expose it through
//! the `as_*` accessors, which are probed once when an [`ActivityWrapper`] is built:
//!
//! - [`Fusable`]: contributes a logical plan fragment so a chain of activities runs as one query.
//! - [`Pipeable`]: streams tuples from input pipes to an output pipe without checkpoints.
//! - [`VariableWriter`]: may write variables visible to downstream activities.
//! - [`ContextConsumer`]: receives its id and the storage manager when attached to a workflow.

mod def;
mod state;
mod wrapper;

pub use def::{ActivityCategory, ActivityDef, ActivityDefBuilder, InPortDef, OutPortDef};
pub use state::{ActivityState, StateObserver};
pub use wrapper::{ActivityConfig, ActivityWrapper, Capabilities};

use crate::dag::{ControlStateMerger, DataStateMerger};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityError, ActivityResult};
use crate::plan::{PlanInterpreter, PlanNode, QueryEngine};
use crate::settings::{Settings, SettingsPreview};
use crate::storage::{CheckpointReader, StorageManager};
use crate::types::{TupleType, TypePreview};
use crate::variables::VariableStore;
use std::sync::Arc;

pub type ActivityId = uuid::Uuid;

/// Checkpoint readers per input port. Unconnected or inactive ports are `None`.
pub type Readers = Vec<Option<Box<dyn CheckpointReader>>>;

pub trait Activity: Send {
    /// Computes one preview per output port from the input previews and the settings known
    /// so far. Must be idempotent and free of side effects. Missing information is reported
    /// as `Unknown`, invalid settings as [`ActivityError::InvalidSetting`].
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>>;

    /// Reads the inputs and writes every output port through `ctx`.
    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()>;

    /// A name describing the configured activity. Failures are ignored by the caller.
    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        Ok(None)
    }

    /// Overrides the data state merger of the definition.
    fn data_state_merger(&self) -> Option<DataStateMerger> {
        None
    }

    /// Overrides the control state merger of the activity configuration.
    fn control_state_merger(&self) -> Option<ControlStateMerger> {
        None
    }

    /// Clears transient state kept between executions.
    fn reset(&mut self) {}

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        None
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        None
    }

    fn as_variable_writer(&mut self) -> Option<&mut dyn VariableWriter> {
        None
    }

    fn as_context_consumer(&mut self) -> Option<&mut dyn ContextConsumer> {
        None
    }
}

pub trait Fusable {
    /// `Some(true)` if the activity can be fused, `None` while this cannot be decided yet.
    /// The first non-empty answer is final until the activity is reset.
    fn can_fuse(&self, _in_types: &[TypePreview], _settings: &SettingsPreview) -> Option<bool> {
        Some(true)
    }

    /// Builds the plan fragment of this activity on top of the fragments of its inputs.
    fn fuse(
        &mut self,
        inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode>;
}

pub trait Pipeable {
    /// Same contract as [`Fusable::can_fuse`].
    fn can_pipe(&self, _in_types: &[TypePreview], _settings: &SettingsPreview) -> Option<bool> {
        Some(true)
    }

    /// Fixes the type of the single output before any tuple flows.
    fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        settings: &Settings,
    ) -> ActivityResult<TupleType>;

    /// Moves tuples from the inputs to the output. Once `output.put` returns `false` the
    /// activity must stop producing and return.
    fn pipe(
        &mut self,
        inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()>;

    /// Estimated number of output tuples, negative if unknown.
    fn estimate_tuple_count(
        &self,
        _in_types: &[Option<TupleType>],
        _settings: &Settings,
        in_counts: &[Option<i64>],
    ) -> i64 {
        compute_tuple_count_sum(in_counts)
    }
}

pub trait VariableWriter {
    /// Whether this activity wants to write variables. Same finality as [`Fusable::can_fuse`].
    /// A granted request rules out fusion and pipelining.
    fn request_variable_write(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> Option<bool> {
        Some(true)
    }

    /// Executes with a writable view of the activity's variables.
    fn execute_with_variables(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
        variables: &mut VariableStore,
    ) -> ActivityResult<()>;
}

pub trait ContextConsumer {
    fn accept(&mut self, activity_id: ActivityId, storage: Arc<dyn StorageManager>);
}

/// Sum of the known input tuple counts. `-1` if no count is known or any count is negative.
pub fn compute_tuple_count_sum(counts: &[Option<i64>]) -> i64 {
    let mut sum = 0i64;
    let mut seen = false;
    for count in counts.iter().flatten() {
        if *count < 0 {
            return -1;
        }
        sum = sum.saturating_add(*count);
        seen = true;
    }
    if seen { sum } else { -1 }
}

/// Takes the input on `port`, failing with an input error if it is absent.
pub fn required_input<T>(inputs: &mut [Option<T>], port: usize) -> ActivityResult<T> {
    inputs
        .get_mut(port)
        .and_then(Option::take)
        .ok_or_else(|| ActivityError::invalid_input(port, "input is not available"))
}

/// Imperative execution through the activity's pipe implementation. The single output
/// port is written to a checkpoint.
pub fn execute_piped<P: Pipeable + ?Sized>(
    activity: &mut P,
    inputs: Readers,
    settings: &Settings,
    ctx: &mut ExecutionContext,
) -> ActivityResult<()> {
    let in_types: Vec<Option<TupleType>> = inputs
        .iter()
        .map(|r| r.as_ref().map(|r| r.tuple_type().clone()))
        .collect();
    let counts: Vec<Option<i64>> = inputs
        .iter()
        .map(|r| r.as_ref().map(|r| r.tuple_count()))
        .collect();
    let out_type = activity.lock_output_type(&in_types, settings)?;
    let estimate = activity.estimate_tuple_count(&in_types, settings, &counts);

    let writer = ctx.create_writer(0, out_type)?;
    let mut output = OutputPipe::from_writer(writer, ctx.interrupt_flag());
    let pipes = inputs
        .into_iter()
        .map(|r| r.map(InputPipe::from_reader))
        .collect();
    let mut pipe_ctx = PipeContext::new(
        ctx.activity_id(),
        ctx.interrupt_flag(),
        estimate,
        ctx.progress_interval(),
    );
    let result = activity.pipe(pipes, &mut output, settings, &mut pipe_ctx);
    ctx.update_progress(pipe_ctx.progress());
    ctx.append_log(pipe_ctx.into_log());
    result?;
    ctx.check_interrupted()?;
    output.close()?;
    Ok(())
}

/// Imperative execution through the activity's fuse implementation. Inputs are read into
/// `Values` fragments and the resulting plan is interpreted in memory.
pub fn execute_fused<F: Fusable + ?Sized>(
    activity: &mut F,
    inputs: Readers,
    settings: &Settings,
    ctx: &mut ExecutionContext,
) -> ActivityResult<()> {
    let fragments = inputs
        .into_iter()
        .map(|reader| {
            reader.map(|reader| PlanNode::Values {
                tuple_type: reader.tuple_type().clone(),
                rows: reader.collect(),
            })
        })
        .collect();
    let mut fuse_ctx = FuseContext::new(ctx.activity_id());
    let plan = activity.fuse(fragments, settings, &mut fuse_ctx);
    ctx.append_log(fuse_ctx.into_log());
    let plan = plan?;

    let mut writer = ctx.create_writer(0, plan.tuple_type().clone())?;
    let rows = PlanInterpreter
        .execute(&plan, ctx.storage())
        .map_err(|e| ActivityError::generic(e.to_string()))?;
    for row in rows {
        writer.write(row)?;
    }
    ctx.check_interrupted()?;
    writer.close()?;
    Ok(())
}
