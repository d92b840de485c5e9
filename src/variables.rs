//! Workflow and dynamic variables, and resolution of variable references inside settings.
//!
//! A variable reference is a JSON object `{"_variableRef": "name/json/pointer"}` that may
//! appear anywhere inside a raw setting value. The first path segment names the variable,
//! the remainder is a JSON pointer into its value.

use crate::error::VariableError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const VARIABLE_REF_FIELD: &str = "_variableRef";

/// Reserved variable holding the error of the last failed upstream activity.
pub const ERROR_VARIABLE: &str = "$error";

/// Variables visible to a single activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableStore {
    workflow: BTreeMap<String, Value>,
    dynamic: BTreeMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow_variables(workflow: BTreeMap<String, Value>) -> Self {
        Self {
            workflow,
            dynamic: BTreeMap::new(),
        }
    }

    /// Looks up a variable by name. Dynamic variables shadow workflow variables.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.dynamic.get(name).or_else(|| self.workflow.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Resolves a reference of the form `name` or `name/json/pointer`.
    pub fn resolve_reference(&self, reference: &str) -> Option<&Value> {
        let (name, pointer) = match reference.split_once('/') {
            Some((name, rest)) => (name, Some(rest)),
            None => (reference, None),
        };
        let value = self.get(name)?;
        match pointer {
            Some(rest) if !rest.is_empty() => value.pointer(&format!("/{}", rest)),
            _ => Some(value),
        }
    }

    /// Replaces every variable reference inside `value` by the referenced value.
    pub fn resolve(&self, value: &Value) -> Result<Value, VariableError> {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get(VARIABLE_REF_FIELD) {
                    let reference = reference
                        .as_str()
                        .ok_or_else(|| VariableError::InvalidReference(reference.to_string()))?;
                    return self
                        .resolve_reference(reference)
                        .cloned()
                        .ok_or_else(|| VariableError::NotFound(reference.to_string()));
                }
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve(v)?)))
                    .collect::<Result<serde_json::Map<_, _>, _>>()
                    .map(Value::Object)
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.dynamic.insert(name.into(), value);
    }

    pub fn set_error(&mut self, error: Value) {
        self.dynamic.insert(ERROR_VARIABLE.to_string(), error);
    }

    pub fn error(&self) -> Option<&Value> {
        self.dynamic.get(ERROR_VARIABLE)
    }

    pub fn workflow_variables(&self) -> &BTreeMap<String, Value> {
        &self.workflow
    }

    pub fn dynamic_variables(&self) -> &BTreeMap<String, Value> {
        &self.dynamic
    }

    /// Starts over from the given workflow variables, dropping all dynamic variables.
    pub fn reset(&mut self, workflow: BTreeMap<String, Value>) {
        self.workflow = workflow;
        self.dynamic.clear();
    }

    /// Adds the dynamic variables of an upstream store. Later stores win on conflicts.
    pub fn merge(&mut self, upstream: &VariableStore) {
        for (name, value) in &upstream.dynamic {
            self.dynamic.insert(name.clone(), value.clone());
        }
    }

    /// All variables as a single map, dynamic variables shadowing workflow ones.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = self.workflow.clone();
        map.extend(self.dynamic.iter().map(|(k, v)| (k.clone(), v.clone())));
        map
    }
}

/// Whether `value` contains a variable reference at any depth.
pub fn contains_variable_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(VARIABLE_REF_FIELD) || map.values().any(contains_variable_ref)
        }
        Value::Array(items) => items.iter().any(contains_variable_ref),
        _ => false,
    }
}

/// Builds a reference value pointing at `reference`.
pub fn variable_ref(reference: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(VARIABLE_REF_FIELD.to_string(), Value::String(reference.to_string()));
    Value::Object(map)
}
