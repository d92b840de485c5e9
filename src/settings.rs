//! Setting definitions, resolved settings and settings previews.
//!
//! Raw settings are JSON values keyed by setting key. Before execution they are resolved
//! against the activity's variables and validated against their [`SettingDef`]. During
//! preview only settings that can already be resolved are visible.

use crate::error::{ActivityError, ActivityResult};
use crate::variables::{VariableStore, contains_variable_ref};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The kind of a setting and its static constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingKind {
    #[serde(rename_all = "camelCase")]
    String { non_blank: bool },
    Int { min: Option<i64>, max: Option<i64> },
    Double { min: Option<f64>, max: Option<f64> },
    Bool,
    Enum { options: Vec<String> },
    /// A list of field names of an input.
    FieldList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDef {
    pub key: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub kind: SettingKind,
    pub default: Value,
}

impl SettingDef {
    fn new(key: &str, display_name: &str, kind: SettingKind, default: Value) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            description: String::new(),
            kind,
            default,
        }
    }

    pub fn string(key: &str, display_name: &str, default: &str) -> Self {
        Self::new(
            key,
            display_name,
            SettingKind::String { non_blank: false },
            Value::from(default),
        )
    }

    pub fn int(key: &str, display_name: &str, default: i64) -> Self {
        Self::new(
            key,
            display_name,
            SettingKind::Int {
                min: None,
                max: None,
            },
            Value::from(default),
        )
    }

    pub fn double(key: &str, display_name: &str, default: f64) -> Self {
        Self::new(
            key,
            display_name,
            SettingKind::Double {
                min: None,
                max: None,
            },
            Value::from(default),
        )
    }

    pub fn boolean(key: &str, display_name: &str, default: bool) -> Self {
        Self::new(key, display_name, SettingKind::Bool, Value::from(default))
    }

    pub fn enumeration(key: &str, display_name: &str, options: &[&str], default: &str) -> Self {
        Self::new(
            key,
            display_name,
            SettingKind::Enum {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            Value::from(default),
        )
    }

    pub fn field_list(key: &str, display_name: &str) -> Self {
        Self::new(
            key,
            display_name,
            SettingKind::FieldList,
            Value::Array(Vec::new()),
        )
    }

    pub fn non_blank(mut self) -> Self {
        if let SettingKind::String { non_blank } = &mut self.kind {
            *non_blank = true;
        }
        self
    }

    /// Restricts an integer setting to `min..=max`.
    pub fn with_int_range(mut self, lower: Option<i64>, upper: Option<i64>) -> Self {
        if let SettingKind::Int { min, max } = &mut self.kind {
            *min = lower;
            *max = upper;
        }
        self
    }

    /// Restricts a double setting to `min..=max`.
    pub fn with_double_range(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        if let SettingKind::Double { min, max } = &mut self.kind {
            *min = lower;
            *max = upper;
        }
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Validates a fully resolved raw value and converts it into a [`SettingValue`].
    pub fn build_value(&self, raw: &Value) -> ActivityResult<SettingValue> {
        let invalid = |message: String| ActivityError::invalid_setting(&self.key, message);
        match &self.kind {
            SettingKind::String { non_blank } => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| invalid(format!("expected a string but found {}", raw)))?;
                if *non_blank && s.trim().is_empty() {
                    return Err(invalid("value must not be blank".to_string()));
                }
                Ok(SettingValue::String(s.to_string()))
            }
            SettingKind::Int { min, max } => {
                let i = raw
                    .as_i64()
                    .ok_or_else(|| invalid(format!("expected an integer but found {}", raw)))?;
                if min.is_some_and(|m| i < m) || max.is_some_and(|m| i > m) {
                    return Err(invalid(format!(
                        "{} is outside of the allowed range {}",
                        i,
                        fmt_range(min, max)
                    )));
                }
                Ok(SettingValue::Int(i))
            }
            SettingKind::Double { min, max } => {
                let d = raw
                    .as_f64()
                    .ok_or_else(|| invalid(format!("expected a number but found {}", raw)))?;
                if min.is_some_and(|m| d < m) || max.is_some_and(|m| d > m) {
                    return Err(invalid(format!(
                        "{} is outside of the allowed range {}",
                        d,
                        fmt_range(min, max)
                    )));
                }
                Ok(SettingValue::Double(d))
            }
            SettingKind::Bool => raw
                .as_bool()
                .map(SettingValue::Bool)
                .ok_or_else(|| invalid(format!("expected a boolean but found {}", raw))),
            SettingKind::Enum { options } => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| invalid(format!("expected a string but found {}", raw)))?;
                if !options.iter().any(|o| o == s) {
                    return Err(invalid(format!(
                        "'{}' is not one of [{}]",
                        s,
                        options.join(", ")
                    )));
                }
                Ok(SettingValue::String(s.to_string()))
            }
            SettingKind::FieldList => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| invalid(format!("expected a list but found {}", raw)))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| invalid(format!("'{}' is not a field name", item)))
                    })
                    .collect::<ActivityResult<Vec<_>>>()
                    .map(SettingValue::List)
            }
        }
    }
}

fn fmt_range<T: fmt::Display>(min: &Option<T>, max: &Option<T>) -> String {
    let bound = |b: &Option<T>| b.as_ref().map(|v| v.to_string()).unwrap_or_default();
    format!("[{}, {}]", bound(min), bound(max))
}

/// A validated setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<String>),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "boolean",
            SettingValue::Int(_) => "integer",
            SettingValue::Double(_) => "number",
            SettingValue::String(_) => "string",
            SettingValue::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            SettingValue::Double(d) => Some(*d),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            SettingValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Double(d) => write!(f, "{}", d),
            SettingValue::String(s) => write!(f, "{}", s),
            SettingValue::List(l) => write!(f, "[{}]", l.join(", ")),
        }
    }
}

/// Fully resolved and validated settings, available at execution time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn new(values: BTreeMap<String, SettingValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> ActivityResult<&SettingValue> {
        self.values
            .get(key)
            .ok_or_else(|| ActivityError::generic(format!("Setting '{}' is not defined", key)))
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        extract: impl FnOnce(&'a SettingValue) -> Option<T>,
    ) -> ActivityResult<T> {
        let value = self.get(key)?;
        extract(value).ok_or_else(|| {
            ActivityError::invalid_setting(
                key,
                format!("expected a {} but found a {}", expected, value.type_name()),
            )
        })
    }

    pub fn get_string(&self, key: &str) -> ActivityResult<&str> {
        self.typed(key, "string", SettingValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> ActivityResult<i64> {
        self.typed(key, "integer", SettingValue::as_int)
    }

    pub fn get_double(&self, key: &str) -> ActivityResult<f64> {
        self.typed(key, "number", SettingValue::as_double)
    }

    pub fn get_bool(&self, key: &str) -> ActivityResult<bool> {
        self.typed(key, "boolean", SettingValue::as_bool)
    }

    pub fn get_list(&self, key: &str) -> ActivityResult<&[String]> {
        self.typed(key, "list", SettingValue::as_list)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Settings as far as they are known during preview.
///
/// Every defined key is listed. A key maps to `None` while its value depends on variables
/// that are not yet stable, or when its value is invalid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsPreview {
    values: BTreeMap<String, Option<SettingValue>>,
}

impl SettingsPreview {
    pub fn new(values: BTreeMap<String, Option<SettingValue>>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// True if every key in `keys` has a known value.
    pub fn keys_present(&self, keys: &[&str]) -> bool {
        keys.iter().all(|k| self.is_present(k))
    }

    pub fn all_present(&self) -> bool {
        self.values.values().all(Option::is_some)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SettingValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SettingValue::as_int)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_double)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(SettingValue::as_bool)
    }

    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(SettingValue::as_list)
    }
}

impl From<Settings> for SettingsPreview {
    fn from(settings: Settings) -> Self {
        Self {
            values: settings
                .values
                .into_iter()
                .map(|(k, v)| (k, Some(v)))
                .collect(),
        }
    }
}

fn raw_or_default<'a>(def: &'a SettingDef, raw: &'a BTreeMap<String, Value>) -> &'a Value {
    raw.get(&def.key).unwrap_or(&def.default)
}

/// Builds the preview of `raw` settings. With `variables == None` the variables are not yet
/// stable and every setting referencing a variable stays unknown. Validation failures are
/// collected, one per offending key, and the corresponding keys stay unknown.
pub fn build_preview(
    defs: &[SettingDef],
    raw: &BTreeMap<String, Value>,
    variables: Option<&VariableStore>,
) -> (SettingsPreview, Vec<ActivityError>) {
    let mut errors = Vec::new();
    let values = defs
        .iter()
        .map(|def| {
            let value = raw_or_default(def, raw);
            let resolved = match (contains_variable_ref(value), variables) {
                (false, _) => Ok(Some(value.clone())),
                (true, None) => Ok(None),
                (true, Some(store)) => store
                    .resolve(value)
                    .map(Some)
                    .map_err(|e| ActivityError::invalid_setting(&def.key, e.to_string())),
            };
            let built = resolved.and_then(|v| v.map(|v| def.build_value(&v)).transpose());
            let entry = match built {
                Ok(v) => v,
                Err(e) => {
                    errors.push(e);
                    None
                }
            };
            (def.key.clone(), entry)
        })
        .collect();
    (SettingsPreview { values }, errors)
}

/// Resolves and validates every setting. Fails on the first invalid setting.
pub fn build_settings(
    defs: &[SettingDef],
    raw: &BTreeMap<String, Value>,
    variables: &VariableStore,
) -> ActivityResult<Settings> {
    let values = defs
        .iter()
        .map(|def| {
            let resolved = variables
                .resolve(raw_or_default(def, raw))
                .map_err(|e| ActivityError::invalid_setting(&def.key, e.to_string()))?;
            Ok((def.key.clone(), def.build_value(&resolved)?))
        })
        .collect::<ActivityResult<BTreeMap<_, _>>>()?;
    Ok(Settings { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::variable_ref;
    use serde_json::json;

    fn defs() -> Vec<SettingDef> {
        vec![
            SettingDef::int("limit", "Limit", 10).with_int_range(Some(0), None),
            SettingDef::enumeration("mode", "Mode", &["a", "b"], "a"),
        ]
    }

    #[test]
    fn test_preview_hides_unstable_references() {
        let raw = BTreeMap::from([("limit".to_string(), variable_ref("n"))]);
        let (preview, errors) = build_preview(&defs(), &raw, None);
        assert!(errors.is_empty());
        assert!(preview.get("limit").is_none());
        assert_eq!(preview.get_string("mode"), Some("a"));
        assert!(!preview.all_present());
    }

    #[test]
    fn test_preview_collects_errors_per_key() {
        let raw = BTreeMap::from([
            ("limit".to_string(), json!(-1)),
            ("mode".to_string(), json!("c")),
        ]);
        let (preview, errors) = build_preview(&defs(), &raw, Some(&VariableStore::new()));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].setting_key(), Some("limit"));
        assert_eq!(errors[1].setting_key(), Some("mode"));
        assert!(!preview.keys_present(&["limit"]));
    }

    #[test]
    fn test_build_settings_reports_missing_variable() {
        let raw = BTreeMap::from([("limit".to_string(), variable_ref("n"))]);
        let err = build_settings(&defs(), &raw, &VariableStore::new()).unwrap_err();
        assert_eq!(err.setting_key(), Some("limit"));
    }

    #[test]
    fn test_typed_getters() {
        let settings = build_settings(&defs(), &BTreeMap::new(), &VariableStore::new()).unwrap();
        assert_eq!(settings.get_int("limit"), Ok(10));
        assert!(settings.get_bool("limit").is_err());
        assert!(matches!(settings.get("nope"), Err(ActivityError::Generic(_))));
    }
}
