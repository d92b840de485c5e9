//! Common test utilities: instrumented activities and workflow builders.
#![allow(dead_code)]

use polyflow::activity::{execute_fused, required_input};
use polyflow::engine::InterruptHandle;
use polyflow::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Counts how an activity was invoked.
#[derive(Debug, Default)]
pub struct Calls {
    pub execute: AtomicUsize,
    pub fuse: AtomicUsize,
    pub pipe: AtomicUsize,
    /// Every call to `OutputPipe::put`, including the rejected ones.
    pub put_attempts: AtomicUsize,
    pub put_accepted: AtomicUsize,
    /// Calls of the capability accessors of recorders.
    pub capability_lookups: AtomicUsize,
    /// Resolved `label` settings seen by recorders, in execution order.
    pub labels: Mutex<Vec<String>>,
    /// Counting sources interrupt the run through this handle after the given number of puts.
    pub interrupt_after: Mutex<Option<(usize, InterruptHandle)>>,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

pub fn number_type() -> TupleType {
    TupleType::relational(vec![Field::new("n", FieldType::BigInt)])
}

/// A pipe-only source producing `rows` numbers and counting every `put`.
pub struct CountingSource {
    calls: Arc<Calls>,
}

impl CountingSource {
    pub const TYPE: &'static str = "testCountingSource";

    pub fn definition() -> std::result::Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Counting Source")
            .category(ActivityCategory::Development)
            .out_port(PortType::Rel, "Numbers")
            .setting(SettingDef::int("rows", "Rows", 100).with_int_range(Some(0), None))
            .build()
    }
}

impl Activity for CountingSource {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(vec![TypePreview::of_type(&number_type())])
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        bump(&self.calls.execute);
        polyflow::activity::execute_piped(self, inputs, settings, ctx)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Pipeable for CountingSource {
    fn lock_output_type(
        &mut self,
        _in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        Ok(number_type())
    }

    fn pipe(
        &mut self,
        _inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        bump(&self.calls.pipe);
        for n in 0..settings.get_int("rows")? {
            bump(&self.calls.put_attempts);
            if !output.put(vec![Value::Int(n)]) {
                break;
            }
            let accepted = self.calls.put_accepted.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.tuple_processed();
            if let Ok(guard) = self.calls.interrupt_after.lock() {
                if let Some((after, handle)) = guard.as_ref() {
                    if accepted >= *after {
                        handle.interrupt();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Forwards its input unchanged. Fusable and pipeable.
pub struct Passthrough {
    calls: Arc<Calls>,
}

impl Passthrough {
    pub const TYPE: &'static str = "testPassthrough";

    pub fn definition() -> std::result::Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Passthrough")
            .category(ActivityCategory::Development)
            .in_port(PortType::Rel, "Input")
            .out_port(PortType::Rel, "Unchanged input")
            .setting(SettingDef::boolean("fail", "Fail at runtime", false))
            .build()
    }
}

impl Activity for Passthrough {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(in_types[0].clone().as_out_types())
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        bump(&self.calls.execute);
        execute_fused(self, inputs, settings, ctx)
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        Some(self)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Fusable for Passthrough {
    fn fuse(
        &mut self,
        mut inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        bump(&self.calls.fuse);
        if settings.get_bool("fail")? {
            return Err(ActivityError::generic("passthrough failed on purpose"));
        }
        required_input(&mut inputs, 0)
    }
}

impl Pipeable for Passthrough {
    fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        in_types[0]
            .clone()
            .ok_or_else(|| ActivityError::invalid_input(0, "input is not available"))
    }

    fn pipe(
        &mut self,
        mut inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        _ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        bump(&self.calls.pipe);
        if settings.get_bool("fail")? {
            return Err(ActivityError::generic("passthrough failed on purpose"));
        }
        let mut input = required_input(&mut inputs, 0)?;
        while let Some(tuple) = input.next() {
            if !output.put(tuple) {
                input.finish_iteration();
                break;
            }
        }
        Ok(())
    }
}

/// Fails every execution. Its input is optional so it can also act as a source.
#[derive(Default)]
pub struct Failing;

impl Failing {
    pub const TYPE: &'static str = "testFailing";

    pub fn definition() -> std::result::Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Failing")
            .category(ActivityCategory::Development)
            .optional_in_port(PortType::Rel, "Ignored input")
            .out_port(PortType::Rel, "Never written")
            .build()
    }
}

impl Activity for Failing {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(vec![TypePreview::of_type(&number_type())])
    }

    fn execute(
        &mut self,
        _inputs: Readers,
        _settings: &Settings,
        _ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        Err(ActivityError::generic("boom"))
    }
}

/// Records its resolved `label` setting and writes one row with it.
pub struct Recorder {
    calls: Arc<Calls>,
}

impl Recorder {
    pub const TYPE: &'static str = "testRecorder";

    pub fn definition() -> std::result::Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Recorder")
            .category(ActivityCategory::Development)
            .optional_in_port(PortType::Rel, "Ignored input")
            .out_port(PortType::Rel, "The label")
            .setting(SettingDef::string("label", "Label", "none"))
            .build()
    }

    fn label_type() -> TupleType {
        TupleType::relational(vec![Field::new("label", FieldType::Text)])
    }
}

impl Activity for Recorder {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(vec![TypePreview::of_type(&Self::label_type())])
    }

    fn execute(
        &mut self,
        _inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        bump(&self.calls.execute);
        let label = settings.get_string("label")?.to_string();
        if let Ok(mut labels) = self.calls.labels.lock() {
            labels.push(label.clone());
        }
        let mut writer = ctx.create_writer(0, Self::label_type())?;
        writer.write(vec![Value::Text(label)])?;
        writer.close()?;
        Ok(())
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        bump(&self.calls.capability_lookups);
        None
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        bump(&self.calls.capability_lookups);
        None
    }

    fn as_variable_writer(&mut self) -> Option<&mut dyn VariableWriter> {
        bump(&self.calls.capability_lookups);
        None
    }

    fn as_context_consumer(&mut self) -> Option<&mut dyn ContextConsumer> {
        bump(&self.calls.capability_lookups);
        None
    }
}

/// Built-in activities plus the instrumented ones, all sharing `calls`.
pub fn test_registry(calls: &Arc<Calls>) -> ActivityRegistry {
    let source_calls = Arc::clone(calls);
    let passthrough_calls = Arc::clone(calls);
    let recorder_calls = Arc::clone(calls);
    ActivityRegistry::builder()
        .with_builtin_activities()
        .register(CountingSource::definition(), move || {
            Box::new(CountingSource {
                calls: Arc::clone(&source_calls),
            })
        })
        .register(Passthrough::definition(), move || {
            Box::new(Passthrough {
                calls: Arc::clone(&passthrough_calls),
            })
        })
        .register(Failing::definition(), || Box::new(Failing))
        .register(Recorder::definition(), move || {
            Box::new(Recorder {
                calls: Arc::clone(&recorder_calls),
            })
        })
        .build()
        .expect("test registry is valid")
}

/// Adds an activity of `activity_type` with the given settings.
pub fn add(
    workflow: &mut Workflow,
    registry: &ActivityRegistry,
    activity_type: &str,
    settings: &[(&str, serde_json::Value)],
) -> ActivityId {
    let model = settings
        .iter()
        .fold(ActivityModel::new(activity_type), |model, (key, value)| {
            model.with_setting(key, value.clone())
        });
    workflow
        .add_activity_model(&model, registry)
        .expect("activity can be added")
}

pub fn values(workflow: &mut Workflow, registry: &ActivityRegistry, rows: i64) -> ActivityId {
    add(workflow, registry, "relValues", &[("rowCount", json!(rows))])
}

pub fn engine_config(fusion: bool, pipelining: bool, workers: usize) -> EngineConfig {
    EngineConfig {
        max_workers: workers,
        fusion_enabled: fusion,
        pipelining_enabled: pipelining,
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub calls: Arc<Calls>,
    pub registry: ActivityRegistry,
    pub storage: Arc<InMemoryStorage>,
    pub workflow: Workflow,
}

impl Harness {
    pub fn new() -> Self {
        let calls = Arc::new(Calls::default());
        let registry = test_registry(&calls);
        let mut workflow = Workflow::default();
        let mut config = workflow.config().clone();
        config.max_workers = 4;
        workflow.set_config(config);
        Self {
            calls,
            registry,
            storage: Arc::new(InMemoryStorage::new()),
            workflow,
        }
    }

    pub fn add(&mut self, activity_type: &str, settings: &[(&str, serde_json::Value)]) -> ActivityId {
        add(&mut self.workflow, &self.registry, activity_type, settings)
    }

    pub fn connect(&mut self, from: ActivityId, to: ActivityId) {
        self.workflow
            .connect(from, 0, to, 0)
            .expect("edge can be added");
    }

    pub fn run(&mut self, config: EngineConfig) -> ExecutionSummary {
        self.run_target(config, None)
    }

    pub fn run_target(
        &mut self,
        config: EngineConfig,
        target: Option<ActivityId>,
    ) -> ExecutionSummary {
        let runner = WorkflowRunner::new(self.storage.clone(), config);
        runner
            .run(&mut self.workflow, target)
            .expect("workflow can be executed")
    }

    pub fn state(&self, id: ActivityId) -> ActivityState {
        self.workflow.get(id).expect("activity exists").state()
    }

    pub fn rows(&self, id: ActivityId) -> Option<Vec<Tuple>> {
        self.storage.checkpoint_rows(id, 0)
    }
}
