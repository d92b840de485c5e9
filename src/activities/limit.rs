use super::locked_fields;
use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Fusable, Pipeable, Readers, execute_piped,
    required_input,
};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityResult, RegistryError};
use crate::plan::PlanNode;
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::{DataModel, PortType, TupleType, TypePreview};

/// Passes on at most `limit` rows after skipping `offset` rows.
#[derive(Debug, Default)]
pub struct RelLimit;

impl RelLimit {
    pub const TYPE: &'static str = "relLimit";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Limit Rows")
            .description("Keeps only the first rows of a table.")
            .category(ActivityCategory::Transform)
            .category(ActivityCategory::Relational)
            .in_port(PortType::Rel, "Input table")
            .out_port(PortType::Rel, "First rows of the input")
            .setting(SettingDef::int("limit", "Limit", 10).with_int_range(Some(0), None))
            .setting(SettingDef::int("offset", "Offset", 0).with_int_range(Some(0), None))
            .build()
    }
}

fn bounds(settings: &Settings) -> ActivityResult<(usize, usize)> {
    let limit = settings.get_int("limit")?.max(0) as usize;
    let offset = settings.get_int("offset")?.max(0) as usize;
    Ok((offset, limit))
}

impl Activity for RelLimit {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(match in_types.first() {
            Some(preview @ TypePreview::Rel { .. }) => vec![preview.clone()],
            _ => vec![TypePreview::unknown_of(DataModel::Relational)],
        })
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        execute_piped(self, inputs, settings, ctx)
    }

    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        Ok(settings.get_int("limit").map(|l| format!("First {} Rows", l)))
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        Some(self)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Fusable for RelLimit {
    fn fuse(
        &mut self,
        mut inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        let (offset, fetch) = bounds(settings)?;
        Ok(PlanNode::Limit {
            input: Box::new(required_input(&mut inputs, 0)?),
            offset,
            fetch: Some(fetch),
        })
    }
}

impl Pipeable for RelLimit {
    fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        Ok(TupleType::relational(locked_fields(in_types, 0)?.to_vec()))
    }

    fn pipe(
        &mut self,
        mut inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        let mut input = required_input(&mut inputs, 0)?;
        let (offset, limit) = bounds(settings)?;
        let mut skipped = 0;
        let mut passed = 0;
        while passed < limit {
            let Some(tuple) = input.next() else {
                break;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if !output.put(tuple) {
                break;
            }
            passed += 1;
            ctx.tuple_processed();
        }
        // Upstream stops producing once it notices we are done.
        input.finish_iteration();
        Ok(())
    }

    fn estimate_tuple_count(
        &self,
        _in_types: &[Option<TupleType>],
        settings: &Settings,
        in_counts: &[Option<i64>],
    ) -> i64 {
        let Ok((offset, limit)) = bounds(settings) else {
            return -1;
        };
        match in_counts.first().copied().flatten() {
            Some(count) if count >= 0 => (count - offset as i64).clamp(0, limit as i64),
            _ => limit as i64,
        }
    }
}
