use super::{input_fields, locked_fields};
use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Fusable, Pipeable, Readers, execute_fused,
    required_input,
};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::plan::PlanNode;
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::{DataModel, Field, PortType, TupleType, TypePreview};

/// Selects and reorders columns.
#[derive(Debug, Default)]
pub struct RelProject;

impl RelProject {
    pub const TYPE: &'static str = "relProject";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Select Columns")
            .description("Keeps the selected columns in the given order.")
            .category(ActivityCategory::Transform)
            .category(ActivityCategory::Relational)
            .in_port(PortType::Rel, "Input table")
            .out_port(PortType::Rel, "Table with the selected columns")
            .setting(SettingDef::field_list("columns", "Columns"))
            .build()
    }
}

/// Indexes of `columns` in `fields` together with the projected fields.
fn projection(fields: &[Field], columns: &[String]) -> ActivityResult<(Vec<usize>, Vec<Field>)> {
    if columns.is_empty() {
        return Err(ActivityError::invalid_setting(
            "columns",
            "at least one column must be selected",
        ));
    }
    columns
        .iter()
        .map(|column| {
            fields
                .iter()
                .position(|f| f.name == *column)
                .map(|index| (index, fields[index].clone()))
                .ok_or_else(|| {
                    ActivityError::invalid_setting(
                        "columns",
                        format!("column '{}' does not exist", column),
                    )
                })
        })
        .collect::<ActivityResult<Vec<_>>>()
        .map(|selected| selected.into_iter().unzip())
}

impl Activity for RelProject {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        match (input_fields(in_types, 0), settings.get_list("columns")) {
            (Some(fields), Some(columns)) => {
                let (_, projected) = projection(fields, columns)?;
                Ok(vec![TypePreview::Rel { fields: projected }])
            }
            _ => Ok(vec![TypePreview::unknown_of(DataModel::Relational)]),
        }
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        execute_fused(self, inputs, settings, ctx)
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        Some(self)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Fusable for RelProject {
    fn fuse(
        &mut self,
        mut inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        let input = required_input(&mut inputs, 0)?;
        let (columns, fields) =
            projection(input.tuple_type().fields(), settings.get_list("columns")?)?;
        Ok(PlanNode::Project {
            input: Box::new(input),
            columns,
            tuple_type: TupleType::relational(fields),
        })
    }
}

impl Pipeable for RelProject {
    fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        settings: &Settings,
    ) -> ActivityResult<TupleType> {
        let (_, fields) = projection(locked_fields(in_types, 0)?, settings.get_list("columns")?)?;
        Ok(TupleType::relational(fields))
    }

    fn pipe(
        &mut self,
        mut inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        let mut input = required_input(&mut inputs, 0)?;
        let (columns, _) = projection(input.tuple_type().fields(), settings.get_list("columns")?)?;
        while let Some(tuple) = input.next() {
            let projected = columns.iter().map(|i| tuple[*i].clone()).collect();
            if !output.put(projected) {
                input.finish_iteration();
                break;
            }
            ctx.tuple_processed();
        }
        Ok(())
    }
}
