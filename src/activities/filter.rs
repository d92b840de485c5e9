use super::{input_fields, locked_fields};
use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Fusable, Pipeable, Readers, execute_fused,
    required_input,
};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::plan::{CompareOp, PlanNode, Predicate};
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::{DataModel, Field, PortType, TupleType, TypePreview};
use crate::value::Value;

/// Keeps the rows whose column satisfies a comparison.
#[derive(Debug, Default)]
pub struct RelFilter;

impl RelFilter {
    pub const TYPE: &'static str = "relFilter";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Filter Rows")
            .description("Keeps the rows matching a condition.")
            .category(ActivityCategory::Transform)
            .category(ActivityCategory::Relational)
            .in_port(PortType::Rel, "Table to filter")
            .out_port(PortType::Rel, "Matching rows")
            .setting(SettingDef::string("column", "Column", "").non_blank())
            .setting(SettingDef::enumeration(
                "operator",
                "Operator",
                &CompareOp::ALL,
                "=",
            ))
            .setting(
                SettingDef::string("value", "Value", "")
                    .describe("Literal compared against the column. Ignored for null checks."),
            )
            .build()
    }
}

/// Builds the predicate for the given settings. Fails with a setting error if the column
/// does not exist or the literal does not fit the column type.
fn predicate(
    fields: &[Field],
    column: &str,
    operator: &str,
    literal: &str,
) -> ActivityResult<Predicate> {
    let op = CompareOp::parse(operator).ok_or_else(|| {
        ActivityError::invalid_setting("operator", format!("unknown operator '{}'", operator))
    })?;
    let index = fields.iter().position(|f| f.name == column).ok_or_else(|| {
        ActivityError::invalid_setting("column", format!("column '{}' does not exist", column))
    })?;
    let value = if op.is_unary() {
        Value::Null
    } else {
        fields[index]
            .field_type
            .parse_literal(literal)
            .ok_or_else(|| {
                ActivityError::invalid_setting(
                    "value",
                    format!("'{}' is not a valid {}", literal, fields[index].field_type),
                )
            })?
    };
    Ok(Predicate {
        column: index,
        op,
        value,
    })
}

fn settings_predicate(fields: &[Field], settings: &Settings) -> ActivityResult<Predicate> {
    predicate(
        fields,
        settings.get_string("column")?,
        settings.get_string("operator")?,
        settings.get_string("value")?,
    )
}

impl Activity for RelFilter {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        let Some(fields) = input_fields(in_types, 0) else {
            return Ok(vec![TypePreview::unknown_of(DataModel::Relational)]);
        };
        if let (Some(column), Some(operator), Some(literal)) = (
            settings.get_string("column"),
            settings.get_string("operator"),
            settings.get_string("value"),
        ) {
            predicate(fields, column, operator, literal)?;
        }
        Ok(vec![TypePreview::Rel {
            fields: fields.to_vec(),
        }])
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        execute_fused(self, inputs, settings, ctx)
    }

    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        let (Some(column), Some(operator)) =
            (settings.get_string("column"), settings.get_string("operator"))
        else {
            return Ok(None);
        };
        Ok(Some(match settings.get_string("value") {
            Some(value) if CompareOp::parse(operator).is_some_and(|op| !op.is_unary()) => {
                format!("Filter {} {} {}", column, operator, value)
            }
            _ => format!("Filter {} {}", column, operator),
        }))
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        Some(self)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Fusable for RelFilter {
    fn fuse(
        &mut self,
        mut inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        let input = required_input(&mut inputs, 0)?;
        let predicate = settings_predicate(input.tuple_type().fields(), settings)?;
        Ok(PlanNode::Filter {
            input: Box::new(input),
            predicate,
        })
    }
}

impl Pipeable for RelFilter {
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
        let predicate = settings_predicate(input.tuple_type().fields(), settings)?;
        while let Some(tuple) = input.next() {
            ctx.tuple_processed();
            if predicate.matches(&tuple) && !output.put(tuple) {
                input.finish_iteration();
                break;
            }
        }
        Ok(())
    }

    fn estimate_tuple_count(
        &self,
        _in_types: &[Option<TupleType>],
        _settings: &Settings,
        in_counts: &[Option<i64>],
    ) -> i64 {
        in_counts.first().copied().flatten().unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn fields() -> Vec<Field> {
        vec![
            Field::new("id", FieldType::BigInt),
            Field::new("name", FieldType::Text),
        ]
    }

    #[test]
    fn test_predicate_parses_literal_by_column_type() {
        let p = predicate(&fields(), "id", ">=", "4").unwrap();
        assert_eq!(p.column, 0);
        assert_eq!(p.value, Value::Int(4));
    }

    #[test]
    fn test_unknown_column_is_setting_error() {
        let err = predicate(&fields(), "age", "=", "4").unwrap_err();
        assert_eq!(err.setting_key(), Some("column"));
    }

    #[test]
    fn test_invalid_literal_is_setting_error() {
        let err = predicate(&fields(), "id", "=", "four").unwrap_err();
        assert_eq!(err.setting_key(), Some("value"));
    }
}
