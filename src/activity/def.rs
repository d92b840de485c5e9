use crate::dag::DataStateMerger;
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::settings::{self, SettingDef, Settings, SettingsPreview};
use crate::types::{PortType, TypePreview};
use crate::variables::VariableStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityCategory {
    Extract,
    Transform,
    Load,
    Variables,
    Relational,
    Document,
    Graph,
    CrossModel,
    Essentials,
    Development,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InPortDef {
    pub port_type: PortType,
    pub optional: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutPortDef {
    pub port_type: PortType,
    pub description: String,
}

/// Static description of an activity type: its ports, settings and default behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDef {
    #[serde(rename = "type")]
    activity_type: String,
    display_name: String,
    short_description: String,
    categories: Vec<ActivityCategory>,
    in_ports: Vec<InPortDef>,
    out_ports: Vec<OutPortDef>,
    settings: Vec<SettingDef>,
    data_state_merger: DataStateMerger,
}

impl ActivityDef {
    pub fn builder(activity_type: &str, display_name: &str) -> ActivityDefBuilder {
        ActivityDefBuilder {
            def: ActivityDef {
                activity_type: activity_type.to_string(),
                display_name: display_name.to_string(),
                short_description: String::new(),
                categories: Vec::new(),
                in_ports: Vec::new(),
                out_ports: Vec::new(),
                settings: Vec::new(),
                data_state_merger: DataStateMerger::And,
            },
        }
    }

    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn short_description(&self) -> &str {
        &self.short_description
    }

    pub fn categories(&self) -> &[ActivityCategory] {
        &self.categories
    }

    pub fn in_ports(&self) -> &[InPortDef] {
        &self.in_ports
    }

    pub fn out_ports(&self) -> &[OutPortDef] {
        &self.out_ports
    }

    pub fn in_port_count(&self) -> usize {
        self.in_ports.len()
    }

    pub fn out_port_count(&self) -> usize {
        self.out_ports.len()
    }

    pub fn settings(&self) -> &[SettingDef] {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<&SettingDef> {
        self.settings.iter().find(|s| s.key == key)
    }

    pub fn data_state_merger(&self) -> DataStateMerger {
        self.data_state_merger
    }

    /// Indices of the input ports that must be connected.
    pub fn required_in_ports(&self) -> BTreeSet<usize> {
        self.in_ports
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.optional)
            .map(|(i, _)| i)
            .collect()
    }

    /// One `Unknown` preview per output port, carrying the port's data model.
    pub fn default_out_type_preview(&self) -> Vec<TypePreview> {
        self.out_ports
            .iter()
            .map(|p| p.port_type.default_preview())
            .collect()
    }

    pub fn default_settings(&self) -> BTreeMap<String, Value> {
        self.settings
            .iter()
            .map(|s| (s.key.clone(), s.default.clone()))
            .collect()
    }

    /// See [`settings::build_preview`].
    pub fn build_settings_preview(
        &self,
        raw: &BTreeMap<String, Value>,
        variables: Option<&VariableStore>,
    ) -> (SettingsPreview, Vec<ActivityError>) {
        settings::build_preview(&self.settings, raw, variables)
    }

    pub fn build_settings(
        &self,
        raw: &BTreeMap<String, Value>,
        variables: &VariableStore,
    ) -> ActivityResult<Settings> {
        settings::build_settings(&self.settings, raw, variables)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: String| RegistryError::InvalidDefinition {
            activity_type: self.activity_type.clone(),
            message,
        };
        if self.activity_type.trim().is_empty() {
            return Err(invalid("activity type must not be blank".to_string()));
        }
        let mut keys = BTreeSet::new();
        for setting in &self.settings {
            if !keys.insert(setting.key.as_str()) {
                return Err(invalid(format!("setting '{}' is defined twice", setting.key)));
            }
        }
        Ok(())
    }
}

pub struct ActivityDefBuilder {
    def: ActivityDef,
}

impl ActivityDefBuilder {
    pub fn description(mut self, description: &str) -> Self {
        self.def.short_description = description.to_string();
        self
    }

    pub fn category(mut self, category: ActivityCategory) -> Self {
        self.def.categories.push(category);
        self
    }

    pub fn in_port(mut self, port_type: PortType, description: &str) -> Self {
        self.def.in_ports.push(InPortDef {
            port_type,
            optional: false,
            description: description.to_string(),
        });
        self
    }

    pub fn optional_in_port(mut self, port_type: PortType, description: &str) -> Self {
        self.def.in_ports.push(InPortDef {
            port_type,
            optional: true,
            description: description.to_string(),
        });
        self
    }

    pub fn out_port(mut self, port_type: PortType, description: &str) -> Self {
        self.def.out_ports.push(OutPortDef {
            port_type,
            description: description.to_string(),
        });
        self
    }

    pub fn setting(mut self, setting: SettingDef) -> Self {
        self.def.settings.push(setting);
        self
    }

    pub fn data_state_merger(mut self, merger: DataStateMerger) -> Self {
        self.def.data_state_merger = merger;
        self
    }

    /// Finishes the definition. Setting keys must be unique.
    pub fn build(self) -> Result<ActivityDef, RegistryError> {
        self.def.validate()?;
        Ok(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_ports_and_default_preview() {
        let def = ActivityDef::builder("test", "Test")
            .in_port(PortType::Rel, "a")
            .optional_in_port(PortType::Any, "b")
            .out_port(PortType::Doc, "out")
            .build()
            .unwrap();
        assert_eq!(def.required_in_ports(), BTreeSet::from([0]));
        assert_eq!(
            def.default_out_type_preview(),
            vec![TypePreview::unknown_of(crate::types::DataModel::Document)]
        );
    }

    #[test]
    fn test_duplicate_setting_is_rejected() {
        let result = ActivityDef::builder("test", "Test")
            .setting(SettingDef::int("n", "N", 5))
            .setting(SettingDef::boolean("n", "N", true))
            .build();
        assert!(matches!(result, Err(RegistryError::InvalidDefinition { .. })));
    }
}
