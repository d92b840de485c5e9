//! Serializable records of workflows, activities and edges.

use crate::activity::{ActivityId, ActivityState};
use crate::dag::ControlStateMerger;
use crate::engine::{ExecutionStrategy, LogEntry};
use crate::types::TypePreview;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-activity configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivityConfigModel {
    /// The activity always materializes its outputs and is never absorbed into the
    /// fused or piped submission of a successor.
    pub enforce_checkpoint: bool,
    pub control_state_merger: ControlStateMerger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityModel {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub id: ActivityId,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub config: ActivityConfigModel,
    /// Opaque UI metadata, stored as is.
    #[serde(default)]
    pub rendering: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ActivityState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_type_preview: Option<Vec<TypePreview>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_type_preview: Option<Vec<TypePreview>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_settings: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_info: Option<ExecutionInfo>,
}

impl ActivityModel {
    /// A model of a new activity of `activity_type` with default settings and a random id.
    pub fn new(activity_type: &str) -> Self {
        Self {
            activity_type: activity_type.to_string(),
            id: Uuid::new_v4(),
            settings: BTreeMap::new(),
            config: ActivityConfigModel::default(),
            rendering: Value::Null,
            state: None,
            in_type_preview: None,
            out_type_preview: None,
            invalid_settings: None,
            invalid_reason: None,
            variables: None,
            dynamic_name: None,
            rolled_back: None,
            execution_info: None,
        }
    }

    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    pub fn with_config(mut self, config: ActivityConfigModel) -> Self {
        self.config = config;
        self
    }
}

/// An edge. For control edges `from_port` 0 means "on success" and 1 "on failure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeModel {
    pub from_id: ActivityId,
    pub to_id: ActivityId,
    #[serde(default)]
    pub from_port: usize,
    #[serde(default)]
    pub to_port: usize,
    #[serde(default)]
    pub is_control: bool,
}

impl EdgeModel {
    pub fn data(from_id: ActivityId, from_port: usize, to_id: ActivityId, to_port: usize) -> Self {
        Self {
            from_id,
            to_id,
            from_port,
            to_port,
            is_control: false,
        }
    }

    pub fn control(from_id: ActivityId, to_id: ActivityId, on_success: bool) -> Self {
        Self {
            from_id,
            to_id,
            from_port: if on_success { 0 } else { 1 },
            to_port: 0,
            is_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowConfigModel {
    pub max_workers: usize,
    pub fusion_enabled: bool,
    pub pipeline_enabled: bool,
}

impl Default for WorkflowConfigModel {
    fn default() -> Self {
        Self {
            max_workers: 1,
            fusion_enabled: true,
            pipeline_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowModel {
    pub activities: Vec<ActivityModel>,
    pub edges: Vec<EdgeModel>,
    pub config: WorkflowConfigModel,
    pub variables: BTreeMap<String, Value>,
}

impl WorkflowModel {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// What happened during the execution of the submission an activity was part of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub strategy: ExecutionStrategy,
    pub root: ActivityId,
    pub activities: Vec<ActivityId>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Output tuple counts of the root activity, one per output port.
    pub tuple_counts: Vec<i64>,
    pub estimated_tuple_count: i64,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
}

impl ExecutionInfo {
    pub fn new(strategy: ExecutionStrategy, root: ActivityId, activities: Vec<ActivityId>) -> Self {
        Self {
            strategy,
            root,
            activities,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            tuple_counts: Vec::new(),
            estimated_tuple_count: -1,
            progress: 0.0,
            logs: Vec::new(),
            error: None,
        }
    }

    pub fn duration_millis(&self) -> Option<i64> {
        Some((self.finished_at? - self.started_at?).num_milliseconds())
    }
}
