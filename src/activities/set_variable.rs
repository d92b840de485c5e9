use crate::activity::{Activity, ActivityCategory, ActivityDef, Readers, VariableWriter};
use crate::engine::ExecutionContext;
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::TypePreview;
use crate::variables::VariableStore;
use serde_json::Value;

/// Publishes a variable to every activity downstream.
#[derive(Debug, Default)]
pub struct SetVariable;

impl SetVariable {
    pub const TYPE: &'static str = "setVariable";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Set Variable")
            .description("Sets a variable for all successors.")
            .category(ActivityCategory::Variables)
            .category(ActivityCategory::Essentials)
            .setting(SettingDef::string("name", "Name", "value").non_blank())
            .setting(
                SettingDef::string("value", "Value", "")
                    .describe("JSON value of the variable. Text that is not JSON is stored as a string."),
            )
            .build()
    }
}

fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl Activity for SetVariable {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(Vec::new())
    }

    fn execute(
        &mut self,
        _inputs: Readers,
        _settings: &Settings,
        _ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        Err(ActivityError::generic(
            "setting a variable requires write access to variables",
        ))
    }

    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        Ok(settings.get_string("name").map(|n| format!("Set {}", n)))
    }

    fn as_variable_writer(&mut self) -> Option<&mut dyn VariableWriter> {
        Some(self)
    }
}

impl VariableWriter for SetVariable {
    fn execute_with_variables(
        &mut self,
        _inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
        variables: &mut VariableStore,
    ) -> ActivityResult<()> {
        let name = settings.get_string("name")?;
        if name.starts_with('$') {
            return Err(ActivityError::invalid_setting(
                "name",
                "names starting with '$' are reserved",
            ));
        }
        let value = parse_value(settings.get_string("value")?);
        ctx.log_info(format!("Setting variable '{}' to {}", name, value));
        variables.set_variable(name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_is_parsed_as_json_when_possible() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\": true}"), json!({ "a": true }));
        assert_eq!(parse_value("hello"), json!("hello"));
    }
}
