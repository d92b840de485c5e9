use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Fusable, Pipeable, Readers, execute_fused,
};
use crate::dag::DataStateMerger;
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::plan::PlanNode;
use crate::settings::{Settings, SettingsPreview};
use crate::types::{DataModel, PortType, TupleType, TypePreview};

/// Appends the rows of the second table to the rows of the first. Runs as soon as one of
/// its inputs is active.
#[derive(Debug, Default)]
pub struct RelUnion;

impl RelUnion {
    pub const TYPE: &'static str = "relUnion";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Union")
            .description("Combines the rows of two tables with compatible columns.")
            .category(ActivityCategory::Transform)
            .category(ActivityCategory::Relational)
            .optional_in_port(PortType::Rel, "First table")
            .optional_in_port(PortType::Rel, "Second table")
            .out_port(PortType::Rel, "Rows of both tables")
            .data_state_merger(DataStateMerger::Or)
            .build()
    }
}

/// The common type of the available inputs.
fn union_type(types: &[TupleType]) -> ActivityResult<TupleType> {
    if types.is_empty() {
        return Err(ActivityError::invalid_input(0, "no input is available"));
    }
    TupleType::least_restrictive(types).ok_or_else(|| {
        ActivityError::invalid_input(1, "inputs do not have the same number of columns")
    })
}

impl Activity for RelUnion {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        let unknown = TypePreview::unknown_of(DataModel::Relational);
        let mut types = Vec::new();
        for preview in in_types {
            match preview {
                TypePreview::Missing | TypePreview::Inactive => {}
                TypePreview::Rel { fields } => types.push(TupleType::relational(fields.clone())),
                _ => return Ok(vec![unknown]),
            }
        }
        if types.is_empty() {
            return Ok(vec![unknown]);
        }
        Ok(vec![TypePreview::of_type(&union_type(&types)?)])
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

impl Fusable for RelUnion {
    fn fuse(
        &mut self,
        inputs: Vec<Option<PlanNode>>,
        _settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        let inputs: Vec<PlanNode> = inputs.into_iter().flatten().collect();
        let types: Vec<TupleType> = inputs.iter().map(|i| i.tuple_type().clone()).collect();
        let tuple_type = union_type(&types)?;
        Ok(PlanNode::Union { inputs, tuple_type })
    }
}

impl Pipeable for RelUnion {
    fn lock_output_type(
        &mut self,
        in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        let types: Vec<TupleType> = in_types.iter().flatten().cloned().collect();
        union_type(&types)
    }

    fn pipe(
        &mut self,
        inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        _settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        for mut input in inputs.into_iter().flatten() {
            while let Some(tuple) = input.next() {
                if !output.put(tuple) {
                    return Ok(());
                }
                ctx.tuple_processed();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType};

    #[test]
    fn test_preview_ignores_inactive_input() {
        let fields = vec![Field::new("id", FieldType::BigInt)];
        let out = RelUnion
            .preview_out_types(
                &[TypePreview::Inactive, TypePreview::Rel { fields: fields.clone() }],
                &SettingsPreview::default(),
            )
            .unwrap();
        assert_eq!(out, vec![TypePreview::Rel { fields }]);
    }

    #[test]
    fn test_preview_rejects_different_arity() {
        let a = TypePreview::Rel {
            fields: vec![Field::new("id", FieldType::BigInt)],
        };
        let b = TypePreview::Rel {
            fields: vec![
                Field::new("id", FieldType::BigInt),
                Field::new("name", FieldType::Text),
            ],
        };
        let err = RelUnion
            .preview_out_types(&[a, b], &SettingsPreview::default())
            .unwrap_err();
        assert_eq!(err.port(), Some(1));
    }
}
