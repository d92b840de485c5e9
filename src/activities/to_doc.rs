use super::input_fields;
use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Pipeable, Readers, execute_piped, required_input,
};
use crate::engine::{ExecutionContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityResult, RegistryError};
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::{DataModel, PortType, TupleType, TypePreview};
use crate::value::{Tuple, Value};
use serde_json::Map;

/// Turns every row into a document with one entry per column.
#[derive(Debug, Default)]
pub struct RelToDoc;

impl RelToDoc {
    pub const TYPE: &'static str = "relToDoc";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Table to Documents")
            .description("Converts rows into documents.")
            .category(ActivityCategory::Transform)
            .category(ActivityCategory::CrossModel)
            .in_port(PortType::Rel, "Table to convert")
            .out_port(PortType::Doc, "One document per row")
            .setting(
                SettingDef::boolean("includeNulls", "Include Nulls", true)
                    .describe("Whether columns holding null become document entries."),
            )
            .build()
    }
}

fn to_document(names: &[String], tuple: Tuple, include_nulls: bool) -> Tuple {
    let document: Map<String, serde_json::Value> = names
        .iter()
        .zip(tuple)
        .filter(|(_, value)| include_nulls || !value.is_null())
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    vec![Value::Json(serde_json::Value::Object(document))]
}

impl Activity for RelToDoc {
    fn preview_out_types(
        &self,
        in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(match input_fields(in_types, 0) {
            Some(fields) => vec![TypePreview::doc(fields.iter().map(|f| f.name.clone()))],
            None => vec![TypePreview::unknown_of(DataModel::Document)],
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

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Pipeable for RelToDoc {
    fn lock_output_type(
        &mut self,
        _in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        Ok(TupleType::Document)
    }

    fn pipe(
        &mut self,
        mut inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        let mut input = required_input(&mut inputs, 0)?;
        let include_nulls = settings.get_bool("includeNulls")?;
        let names: Vec<String> = input
            .tuple_type()
            .field_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        while let Some(tuple) = input.next() {
            if !output.put(to_document(&names, tuple, include_nulls)) {
                input.finish_iteration();
                break;
            }
            ctx.tuple_processed();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_skips_nulls_when_asked() {
        let names = vec!["id".to_string(), "name".to_string()];
        let tuple = vec![Value::Int(1), Value::Null];
        assert_eq!(
            to_document(&names, tuple.clone(), false),
            vec![Value::Json(json!({ "id": 1 }))]
        );
        assert_eq!(
            to_document(&names, tuple, true),
            vec![Value::Json(json!({ "id": 1, "name": null }))]
        );
    }
}
