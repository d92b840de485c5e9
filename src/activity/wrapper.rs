use super::state::StateCell;
use super::{
    Activity, ActivityDef, ActivityId, ActivityState, Fusable, Pipeable, Readers, StateObserver,
};
use crate::dag::{ControlStateMerger, DataStateMerger, Edge, EdgeState};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityError, ActivityResult, RegistryError, WorkflowError};
use crate::model::{ActivityConfigModel, ActivityModel, ExecutionInfo};
use crate::plan::PlanNode;
use crate::registry::ActivityRegistry;
use crate::settings::{Settings, SettingsPreview};
use crate::storage::StorageManager;
use crate::types::{TupleType, TypePreview, merge_out_type_preview};
use crate::variables::VariableStore;
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub type ActivityConfig = ActivityConfigModel;

/// Optional capabilities of an activity, determined once when its wrapper is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub fusable: bool,
    pub pipeable: bool,
    pub variable_writer: bool,
    pub context_consumer: bool,
}

impl Capabilities {
    pub fn probe(activity: &mut dyn Activity) -> Self {
        Self {
            fusable: activity.as_fusable().is_some(),
            pipeable: activity.as_pipeable().is_some(),
            variable_writer: activity.as_variable_writer().is_some(),
            context_consumer: activity.as_context_consumer().is_some(),
        }
    }
}

/// An activity instance inside a workflow, together with everything the engine tracks
/// about it: settings, configuration, variables, previews, validity and execution state.
pub struct ActivityWrapper {
    id: ActivityId,
    def: Arc<ActivityDef>,
    activity: Box<dyn Activity>,
    capabilities: Capabilities,

    settings: BTreeMap<String, Value>,
    config: ActivityConfig,
    rendering: Value,
    variables: VariableStore,
    state: StateCell,

    in_type_preview: Vec<TypePreview>,
    out_type_preview: Vec<TypePreview>,
    settings_preview: SettingsPreview,
    invalid_settings: BTreeMap<String, String>,
    invalid_reason: Option<String>,
    dynamic_name: Option<String>,

    rolled_back: bool,
    execution_info: Option<ExecutionInfo>,

    // Decisions are final once known, until the next reset.
    fuse_decision: Option<bool>,
    pipe_decision: Option<bool>,
    variable_write_decision: Option<bool>,
    locked_out_type: Option<TupleType>,
}

impl fmt::Debug for ActivityWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityWrapper")
            .field("id", &self.id)
            .field("type", &self.def.activity_type())
            .field("state", &self.state.get())
            .field("capabilities", &self.capabilities)
            .field("out_type_preview", &self.out_type_preview)
            .field("invalid_settings", &self.invalid_settings)
            .field("invalid_reason", &self.invalid_reason)
            .finish()
    }
}

impl ActivityWrapper {
    pub fn new(id: ActivityId, def: Arc<ActivityDef>, mut activity: Box<dyn Activity>) -> Self {
        let capabilities = Capabilities::probe(activity.as_mut());
        let settings = def.default_settings();
        // Invalid defaults are reported by the first preview update.
        let (settings_preview, _) = def.build_settings_preview(&settings, None);
        Self {
            id,
            capabilities,
            activity,
            settings,
            config: ActivityConfig::default(),
            rendering: Value::Null,
            variables: VariableStore::new(),
            state: StateCell::default(),
            in_type_preview: vec![TypePreview::Missing; def.in_port_count()],
            out_type_preview: def.default_out_type_preview(),
            settings_preview,
            invalid_settings: BTreeMap::new(),
            invalid_reason: None,
            dynamic_name: None,
            rolled_back: false,
            execution_info: None,
            fuse_decision: None,
            pipe_decision: None,
            variable_write_decision: None,
            locked_out_type: None,
            def,
        }
    }

    /// Rebuilds a wrapper from its model. Unknown setting keys are dropped, missing ones
    /// take their default. A persisted state is restored as is.
    pub fn from_model(
        model: &ActivityModel,
        registry: &ActivityRegistry,
    ) -> Result<Self, RegistryError> {
        let (def, activity) = registry.create(&model.activity_type)?;
        let mut wrapper = Self::new(model.id, def, activity);
        wrapper.apply_settings(&model.settings);
        wrapper.config = model.config.clone();
        wrapper.rendering = model.rendering.clone();
        if let Some(state) = model.state {
            wrapper.state.set(state);
        }
        wrapper.rolled_back = model.rolled_back.unwrap_or(false);
        wrapper.execution_info = model.execution_info.clone();
        Ok(wrapper)
    }

    pub fn to_model(&self, include_state: bool) -> ActivityModel {
        let mut model = ActivityModel::new(self.def.activity_type());
        model.id = self.id;
        model.settings = self.settings.clone();
        model.config = self.config.clone();
        model.rendering = self.rendering.clone();
        if include_state {
            model.state = Some(self.state());
            model.in_type_preview = Some(self.in_type_preview.clone());
            model.out_type_preview = Some(self.out_type_preview.clone());
            model.invalid_settings = Some(self.invalid_settings.clone());
            model.invalid_reason = self.invalid_reason.clone();
            model.variables = Some(self.variables.to_map());
            model.dynamic_name = self.dynamic_name.clone();
            model.rolled_back = Some(self.rolled_back);
            model.execution_info = self.execution_info.clone();
        }
        model
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn activity_type(&self) -> &str {
        self.def.activity_type()
    }

    pub fn def(&self) -> &Arc<ActivityDef> {
        &self.def
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn settings(&self) -> &BTreeMap<String, Value> {
        &self.settings
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    pub fn rendering(&self) -> &Value {
        &self.rendering
    }

    pub fn set_rendering(&mut self, rendering: Value) {
        self.rendering = rendering;
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub(crate) fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    pub fn state(&self) -> ActivityState {
        self.state.get()
    }

    /// A handle that observes the state from any thread.
    pub fn state_observer(&self) -> StateObserver {
        self.state.observer()
    }

    /// Moves to `next`, failing if the transition is not part of the lifecycle.
    pub fn set_state(&mut self, next: ActivityState) -> Result<(), WorkflowError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(WorkflowError::IllegalTransition {
                activity_id: self.id,
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.state.set(next);
        Ok(())
    }

    pub fn in_type_preview(&self) -> &[TypePreview] {
        &self.in_type_preview
    }

    pub fn out_type_preview(&self) -> &[TypePreview] {
        &self.out_type_preview
    }

    pub fn settings_preview(&self) -> &SettingsPreview {
        &self.settings_preview
    }

    /// Invalid settings of the last preview, keyed by setting key.
    pub fn invalid_settings(&self) -> &BTreeMap<String, String> {
        &self.invalid_settings
    }

    /// Why the last preview failed for a reason other than an invalid setting.
    pub fn invalid_state_reason(&self) -> Option<&str> {
        self.invalid_reason.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_settings.is_empty() && self.invalid_reason.is_none()
    }

    pub fn dynamic_name(&self) -> Option<&str> {
        self.dynamic_name.as_deref()
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    pub(crate) fn set_rolled_back(&mut self, rolled_back: bool) {
        self.rolled_back = rolled_back;
    }

    pub fn execution_info(&self) -> Option<&ExecutionInfo> {
        self.execution_info.as_ref()
    }

    pub(crate) fn set_execution_info(&mut self, info: ExecutionInfo) {
        self.execution_info = Some(info);
    }

    fn apply_settings(&mut self, raw: &BTreeMap<String, Value>) {
        for (key, value) in raw {
            if self.def.setting(key).is_some() {
                self.settings.insert(key.clone(), value.clone());
            } else {
                warn!(activity = %self.id, key = %key, "Dropping unknown setting");
            }
        }
    }

    /// Replaces the given settings. Previews computed from the old settings are discarded.
    pub fn update_settings(&mut self, raw: &BTreeMap<String, Value>) {
        self.apply_settings(raw);
        self.out_type_preview = self.def.default_out_type_preview();
    }

    pub fn reset_settings(&mut self) {
        self.settings = self.def.default_settings();
        self.out_type_preview = self.def.default_out_type_preview();
    }

    pub fn update_config(&mut self, config: ActivityConfig) {
        self.config = config;
    }

    /// Resolves the settings against the current variables for execution.
    pub fn resolve_settings(&self) -> ActivityResult<Settings> {
        self.def.build_settings(&self.settings, &self.variables)
    }

    /// Recomputes previews from the input previews.
    ///
    /// Settings are resolved against the variables only if `has_stable_variables` is set.
    /// Invalid settings are collected without stopping the preview. Any other failure
    /// becomes the invalid state reason. The output previews are updated in every case and
    /// never lose information they already had. The returned error is the failure reason
    /// if there is one, else the first invalid setting.
    pub fn update_out_type_preview(
        &mut self,
        in_types: Vec<TypePreview>,
        has_stable_variables: bool,
    ) -> ActivityResult<SettingsPreview> {
        let variables = has_stable_variables.then_some(&self.variables);
        let (settings_preview, mut setting_errors) =
            self.def.build_settings_preview(&self.settings, variables);

        self.dynamic_name = match self.activity.dynamic_name(&in_types, &settings_preview) {
            Ok(name) => name,
            Err(e) => {
                debug!(activity = %self.id, error = %e, "Ignoring failed dynamic name");
                None
            }
        };

        let mut failure = None;
        self.invalid_reason = None;
        let new_types = match self.preview_and_check(&in_types, &settings_preview) {
            Ok(types) => types,
            Err(e @ ActivityError::InvalidSetting { .. }) => {
                setting_errors.push(e);
                self.def.default_out_type_preview()
            }
            Err(e) => {
                self.invalid_reason = Some(e.to_string());
                failure = Some(e);
                self.def.default_out_type_preview()
            }
        };

        self.invalid_settings = setting_errors
            .iter()
            .filter_map(|e| Some((e.setting_key()?.to_string(), e.message().to_string())))
            .unique_by(|(key, _)| key.clone())
            .collect();
        self.out_type_preview = merge_out_type_preview(&self.out_type_preview, new_types);
        self.in_type_preview = in_types;
        self.settings_preview = settings_preview.clone();

        match (failure, setting_errors.into_iter().next()) {
            (Some(e), _) | (None, Some(e)) => Err(e),
            (None, None) => Ok(settings_preview),
        }
    }

    fn preview_and_check(
        &self,
        in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        let types = self.activity.preview_out_types(in_types, settings)?;
        if types.len() != self.def.out_port_count() {
            return Err(ActivityError::generic(format!(
                "Activity returned {} output previews but has {} output ports",
                types.len(),
                self.def.out_port_count()
            )));
        }
        for (port, def) in self.def.in_ports().iter().enumerate() {
            let preview = in_types.get(port).unwrap_or(&TypePreview::Missing);
            if preview.is_missing() && !def.optional {
                return Err(ActivityError::invalid_input(port, "Required input is not connected"));
            }
            if preview.is_present() && !def.port_type.could_be_compatible(preview) {
                return Err(ActivityError::invalid_input(
                    port,
                    format!("Expected {} input but received {}", def.port_type, preview),
                ));
            }
        }
        Ok(types)
    }

    pub fn data_state_merger(&self) -> DataStateMerger {
        self.activity
            .data_state_merger()
            .unwrap_or_else(|| self.def.data_state_merger())
    }

    pub fn control_state_merger(&self) -> ControlStateMerger {
        self.activity
            .control_state_merger()
            .unwrap_or(self.config.control_state_merger)
    }

    /// Combines the states of the incoming edges. Ignored edges do not count.
    /// Data edges decide first: if they rule execution out the result is `Inactive`
    /// regardless of control edges.
    pub fn can_execute(&self, in_edges: &[&Edge]) -> EdgeState {
        let considered = || in_edges.iter().copied().filter(|e| !e.is_ignored());
        let data: Vec<EdgeState> = considered()
            .filter(|e| e.is_data())
            .sorted_by_key(|e| e.to_port())
            .map(Edge::state)
            .collect();
        if !self.data_state_merger().merge(&data) {
            return EdgeState::Inactive;
        }
        let control = |on_success: bool| -> Vec<EdgeState> {
            considered()
                .filter(|e| e.on_success() == Some(on_success))
                .map(Edge::state)
                .collect()
        };
        self.control_state_merger()
            .merge(&control(true), &control(false))
    }

    /// Whether this activity can be fused, based on the latest previews.
    pub fn can_fuse(&mut self) -> Option<bool> {
        if self.fuse_decision.is_some() {
            return self.fuse_decision;
        }
        let decision = if !self.capabilities.fusable || self.def.out_port_count() != 1 {
            Some(false)
        } else {
            match self.activity.as_fusable() {
                Some(fusable) => fusable.can_fuse(&self.in_type_preview, &self.settings_preview),
                None => Some(false),
            }
        };
        self.fuse_decision = decision;
        decision
    }

    /// Whether this activity can be pipelined, based on the latest previews.
    pub fn can_pipe(&mut self) -> Option<bool> {
        if self.pipe_decision.is_some() {
            return self.pipe_decision;
        }
        let decision = if !self.capabilities.pipeable || self.def.out_port_count() != 1 {
            Some(false)
        } else {
            match self.activity.as_pipeable() {
                Some(pipeable) => pipeable.can_pipe(&self.in_type_preview, &self.settings_preview),
                None => Some(false),
            }
        };
        self.pipe_decision = decision;
        decision
    }

    pub fn requests_variable_write(&mut self) -> Option<bool> {
        if self.variable_write_decision.is_some() {
            return self.variable_write_decision;
        }
        if !self.capabilities.variable_writer {
            self.variable_write_decision = Some(false);
            return Some(false);
        }
        let decision = match self.activity.as_variable_writer() {
            Some(writer) => {
                writer.request_variable_write(&self.in_type_preview, &self.settings_preview)
            }
            None => Some(false),
        };
        self.variable_write_decision = decision;
        decision
    }

    /// Locks the output type for pipelining. The first locked type is kept until reset.
    pub fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        settings: &Settings,
    ) -> ActivityResult<TupleType> {
        if let Some(locked) = &self.locked_out_type {
            return Ok(locked.clone());
        }
        let locked = self
            .pipeable()?
            .lock_output_type(in_types, settings)?;
        self.locked_out_type = Some(locked.clone());
        Ok(locked)
    }

    pub(crate) fn estimate_tuple_count(
        &mut self,
        in_types: &[Option<TupleType>],
        settings: &Settings,
        in_counts: &[Option<i64>],
    ) -> i64 {
        match self.pipeable() {
            Ok(pipeable) => pipeable.estimate_tuple_count(in_types, settings, in_counts),
            Err(_) => super::compute_tuple_count_sum(in_counts),
        }
    }

    pub(crate) fn fuse(
        &mut self,
        inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        self.fusable()?.fuse(inputs, settings, ctx)
    }

    pub(crate) fn pipe(
        &mut self,
        inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        self.pipeable()?.pipe(inputs, output, settings, ctx)
    }

    pub(crate) fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        self.activity.execute(inputs, settings, ctx)
    }

    pub(crate) fn execute_with_variables(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        let writer = if self.capabilities.variable_writer {
            self.activity.as_variable_writer()
        } else {
            None
        };
        writer
            .ok_or_else(|| ActivityError::generic("Activity cannot write variables"))?
            .execute_with_variables(inputs, settings, ctx, &mut self.variables)
    }

    /// Hands id and storage to a context consumer. Does nothing for other activities.
    pub fn accept_context(&mut self, storage: Arc<dyn StorageManager>) {
        if !self.capabilities.context_consumer {
            return;
        }
        let id = self.id;
        if let Some(consumer) = self.activity.as_context_consumer() {
            consumer.accept(id, storage);
        }
    }

    // The accessors below only hand out capabilities recorded in `capabilities`.

    fn fusable(&mut self) -> ActivityResult<&mut dyn Fusable> {
        let fusable = if self.capabilities.fusable {
            self.activity.as_fusable()
        } else {
            None
        };
        fusable.ok_or_else(|| ActivityError::generic("Activity cannot be fused"))
    }

    fn pipeable(&mut self) -> ActivityResult<&mut dyn Pipeable> {
        let pipeable = if self.capabilities.pipeable {
            self.activity.as_pipeable()
        } else {
            None
        };
        pipeable.ok_or_else(|| ActivityError::generic("Activity cannot be pipelined"))
    }

    /// Returns to `Idle` and forgets everything about the previous execution.
    pub fn reset_execution(&mut self) {
        self.state.set(ActivityState::Idle);
        self.rolled_back = false;
        self.execution_info = None;
        self.fuse_decision = None;
        self.pipe_decision = None;
        self.variable_write_decision = None;
        self.locked_out_type = None;
        self.activity.reset();
    }
}
