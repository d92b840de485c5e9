//! Model and configuration tests
//!
//! Serialization of workflows with their execution state, settings handling and
//! engine configuration files.
//!
mod common;
use common::*;
use polyflow::error::ConfigError;
use polyflow::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

#[cfg(test)]
mod model_tests {
    use super::*;

    #[test]
    fn test_workflow_json_round_trip_without_state() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 4);
        let limit = h.add("relLimit", &[("limit", json!(2))]);
        let recorder = h.add(Recorder::TYPE, &[]);
        h.connect(values, limit);
        h.workflow.connect_control(limit, recorder, false).unwrap();

        let json = h.workflow.to_model(false).to_json().unwrap();
        let model = WorkflowModel::from_json(&json).unwrap();
        assert_eq!(model.activities.len(), 3);
        assert!(model.activities.iter().all(|a| a.state.is_none()));
        assert!(model.edges.contains(&EdgeModel::control(limit, recorder, false)));

        let restored = Workflow::from_model(&model, &h.registry).unwrap();
        assert_eq!(restored.activity_ids(), h.workflow.activity_ids());
        assert_eq!(restored.edges().len(), 2);
        assert_eq!(
            restored.get(limit).unwrap().out_type_preview(),
            h.workflow.get(limit).unwrap().out_type_preview()
        );
    }

    #[test]
    fn test_executed_workflow_restores_with_state() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 4);
        let limit = h.add("relLimit", &[("limit", json!(2))]);
        h.connect(values, limit);
        h.run(engine_config(true, true, 2));

        let json = h.workflow.to_model(true).to_json().unwrap();
        let model = WorkflowModel::from_json(&json).unwrap();
        let mut restored = Workflow::from_model(&model, &h.registry).unwrap();

        let wrapper = restored.get(limit).unwrap();
        assert_eq!(wrapper.state(), ActivityState::Saved);
        let info = wrapper.execution_info().unwrap();
        assert_eq!(info.strategy, ExecutionStrategy::Fusion);
        assert_eq!(info.activities, vec![values, limit]);
        assert!(info.duration_millis().is_some());
        assert_eq!(restored.get(values).unwrap().state(), ActivityState::Finished);

        // Checkpoints are still in the storage, so nothing needs to run again.
        let runner = WorkflowRunner::new(h.storage.clone(), EngineConfig::default());
        let summary = runner.run(&mut restored, None).unwrap();
        assert!(summary.submissions.is_empty());
        assert_eq!(restored.get(values).unwrap().state(), ActivityState::Finished);
        assert_eq!(restored.get(limit).unwrap().state(), ActivityState::Saved);
    }

    #[test]
    fn test_saved_state_without_checkpoint_is_rejected() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 4);
        let limit = h.add("relLimit", &[]);
        h.connect(values, limit);
        h.run(engine_config(false, false, 2));
        let model = h.workflow.to_model(true);

        let mut restored = Workflow::from_model(&model, &h.registry).unwrap();
        let runner = WorkflowRunner::new(Arc::new(InMemoryStorage::new()), EngineConfig::default());
        let result = runner.run(&mut restored, Some(limit));

        // `values` is saved but its checkpoint is gone.
        assert!(matches!(result, Err(WorkflowError::InvalidStructure(_))));
    }

    #[test]
    fn test_unknown_settings_are_dropped_and_defaults_filled() {
        let h = Harness::new();
        let model = ActivityModel::new("relLimit")
            .with_setting("limit", json!(7))
            .with_setting("color", json!("blue"));
        let wrapper = ActivityWrapper::from_model(&model, &h.registry).unwrap();

        assert_eq!(wrapper.settings().get("limit"), Some(&json!(7)));
        assert_eq!(wrapper.settings().get("offset"), Some(&json!(0)));
        assert!(!wrapper.settings().contains_key("color"));
        assert_eq!(wrapper.resolve_settings().unwrap().get_int("limit"), Ok(7));
    }

    #[test]
    fn test_out_of_range_setting_fails_resolution() {
        let h = Harness::new();
        let model = ActivityModel::new("relLimit").with_setting("limit", json!(-3));
        let wrapper = ActivityWrapper::from_model(&model, &h.registry).unwrap();

        let err = wrapper.resolve_settings().unwrap_err();
        assert_eq!(err.setting_key(), Some("limit"));
    }

    #[test]
    fn test_enforced_checkpoint_prevents_fusion() {
        let mut h = Harness::new();
        let config = ActivityConfigModel {
            enforce_checkpoint: true,
            ..ActivityConfigModel::default()
        };
        let model = ActivityModel::new("relValues")
            .with_setting("rowCount", json!(4))
            .with_config(config);
        let values = h.workflow.add_activity_model(&model, &h.registry).unwrap();
        let limit = h.add("relLimit", &[("limit", json!(2))]);
        h.connect(values, limit);

        let summary = h.run(engine_config(true, true, 2));

        assert_eq!(summary.submissions.len(), 2);
        assert_eq!(h.state(values), ActivityState::Saved);
        assert_eq!(h.rows(values).map(|r| r.len()), Some(4));
        assert_eq!(h.rows(limit).map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_engine_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "max_workers = 2\nfusion_enabled = false\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_workers, 2);
        assert!(!config.fusion_enabled);
        assert!(config.pipelining_enabled);
        assert_eq!(config.pipe_queue_capacity, 0);

        let written = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&written).unwrap(), config);
    }

    #[test]
    fn test_engine_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            EngineConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_workers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("progress_interval = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_workflow_variables_survive_round_trip() {
        let variables = BTreeMap::from([("threshold".to_string(), json!({"age": 40}))]);
        let workflow = Workflow::new(Default::default(), variables.clone());
        let json = workflow.to_model(false).to_json().unwrap();
        let model = WorkflowModel::from_json(&json).unwrap();
        assert_eq!(model.variables, variables);
        assert_eq!(model.config.max_workers, 1);
    }
}
