//! Preview tests
//!
//! Type previews, invalid settings and variable dependent settings before execution.
//!
mod common;
use common::*;
use polyflow::prelude::*;
use polyflow::variables::variable_ref;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn rel_fields(preview: &TypePreview) -> Vec<String> {
    preview
        .fields()
        .map(|fields| fields.iter().map(|f| f.name.clone()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod preview_tests {
    use super::*;

    #[test]
    fn test_relational_preview_flows_through_chain() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let filter = h.add(
            "relFilter",
            &[
                ("column", json!("age")),
                ("operator", json!(">")),
                ("value", json!("30")),
            ],
        );
        let project = h.add("relProject", &[("columns", json!(["name", "age"]))]);
        h.connect(values, filter);
        h.connect(filter, project);

        let filter = h.workflow.get(filter).unwrap();
        assert!(filter.is_valid());
        assert_eq!(filter.dynamic_name(), Some("Filter age > 30"));
        assert_eq!(
            rel_fields(&filter.out_type_preview()[0]),
            vec!["id", "name", "lastName", "age", "salary"]
        );

        let project = h.workflow.get(project).unwrap();
        assert_eq!(rel_fields(&project.out_type_preview()[0]), vec!["name", "age"]);
    }

    #[test]
    fn test_unknown_column_is_reported_as_invalid_setting() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let filter = h.add("relFilter", &[("column", json!("height"))]);
        h.connect(values, filter);

        let filter = h.workflow.get(filter).unwrap();
        assert!(!filter.is_valid());
        assert!(filter.invalid_settings()["column"].contains("height"));
        assert!(filter.invalid_state_reason().is_none());
        assert_eq!(
            filter.out_type_preview(),
            &[TypePreview::unknown_of(DataModel::Relational)]
        );
    }

    #[test]
    fn test_unconnected_required_input_invalidates_activity() {
        let mut h = Harness::new();
        let limit = h.add("relLimit", &[]);

        let limit = h.workflow.get(limit).unwrap();
        assert!(limit.invalid_state_reason().is_some());
        assert!(limit.invalid_settings().is_empty());
        assert!(limit.out_type_preview()[0].is_unknown());
    }

    #[test]
    fn test_present_preview_survives_disconnect() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let limit = h.add("relLimit", &[]);
        h.connect(values, limit);
        let before = h.workflow.get(limit).unwrap().out_type_preview().to_vec();
        assert!(before[0].is_present());

        h.workflow
            .remove_edge(&EdgeModel::data(values, 0, limit, 0), h.storage.as_ref())
            .unwrap();

        let limit = h.workflow.get(limit).unwrap();
        assert!(limit.invalid_state_reason().is_some());
        assert_eq!(limit.out_type_preview(), before.as_slice());
    }

    #[test]
    fn test_union_ignores_missing_input() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let union = h.add("relUnion", &[]);
        h.workflow.connect(values, 0, union, 1).unwrap();

        let union = h.workflow.get(union).unwrap();
        assert!(union.is_valid());
        assert_eq!(union.in_type_preview()[0], TypePreview::Missing);
        assert_eq!(rel_fields(&union.out_type_preview()[0]).len(), 5);
    }

    #[test]
    fn test_union_rejects_different_arity() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let numbers = h.add(CountingSource::TYPE, &[]);
        let union = h.add("relUnion", &[]);
        h.workflow.connect(values, 0, union, 0).unwrap();
        h.workflow.connect(numbers, 0, union, 1).unwrap();

        let union = h.workflow.get(union).unwrap();
        assert!(union.invalid_state_reason().is_some());
    }

    #[test]
    fn test_document_preview_lists_field_names() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let to_doc = h.add("relToDoc", &[]);
        h.connect(values, to_doc);

        let preview = &h.workflow.get(to_doc).unwrap().out_type_preview()[0];
        assert_eq!(
            *preview,
            TypePreview::doc(["id", "name", "lastName", "age", "salary"])
        );
        assert_eq!(preview.data_model(), Some(DataModel::Document));
    }

    #[test]
    fn test_relational_output_cannot_feed_document_input() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let to_doc = h.add("relToDoc", &[]);
        let limit = h.add("relLimit", &[]);
        h.connect(values, to_doc);
        h.connect(to_doc, limit);

        let limit = h.workflow.get(limit).unwrap();
        assert!(limit.invalid_state_reason().is_some());
    }

    #[test]
    fn test_workflow_variables_resolve_in_preview() {
        let variables = BTreeMap::from([("rows".to_string(), json!(7))]);
        let mut workflow = Workflow::new(Default::default(), variables);
        let calls = Arc::new(Calls::default());
        let registry = test_registry(&calls);
        let values = add(
            &mut workflow,
            &registry,
            "relValues",
            &[("rowCount", variable_ref("rows"))],
        );

        let values = workflow.get(values).unwrap();
        assert_eq!(values.settings_preview().get_int("rowCount"), Some(7));
        assert_eq!(values.dynamic_name(), Some("7 Sample Rows"));
    }

    #[test]
    fn test_variable_setting_unknown_until_predecessors_terminate() {
        let mut h = Harness::new();
        let values = values(&mut h.workflow, &h.registry, 5);
        let filter = h.add(
            "relFilter",
            &[("column", json!("age")), ("value", variable_ref("minimum"))],
        );
        h.connect(values, filter);

        let filter = h.workflow.get(filter).unwrap();
        assert!(filter.settings_preview().get_string("value").is_none());
        assert_eq!(filter.settings_preview().get_string("column"), Some("age"));
        assert!(filter.is_valid());
        assert_eq!(filter.dynamic_name(), Some("Filter age ="));
    }

    #[test]
    fn test_variable_setting_resolves_once_predecessors_terminate() {
        let mut h = Harness::new();
        h.workflow
            .set_variables(BTreeMap::from([("minimum".to_string(), json!("30"))]));
        let values = values(&mut h.workflow, &h.registry, 5);
        let filter = h.add(
            "relFilter",
            &[("column", json!("age")), ("value", variable_ref("minimum"))],
        );
        h.connect(values, filter);
        let before = h.workflow.get(filter).unwrap().out_type_preview().to_vec();
        assert!(before[0].is_present());
        assert!(h.workflow.get(filter).unwrap().settings_preview().get_string("value").is_none());

        let source = h.workflow.get_mut(values).unwrap();
        for state in [ActivityState::Queued, ActivityState::Executing, ActivityState::Finished] {
            source.set_state(state).unwrap();
        }
        h.workflow.update_preview(filter);

        let filter = h.workflow.get(filter).unwrap();
        assert_eq!(filter.settings_preview().get_string("value"), Some("30"));
        assert_eq!(filter.out_type_preview(), before.as_slice());
        assert!(filter.is_valid());
    }

    #[test]
    fn test_invalid_reason_cleared_when_input_is_connected() {
        let mut h = Harness::new();
        let filter = h.add("relFilter", &[("column", json!("height"))]);
        assert!(h.workflow.get(filter).unwrap().invalid_state_reason().is_some());

        let values = values(&mut h.workflow, &h.registry, 5);
        h.connect(values, filter);

        let filter = h.workflow.get(filter).unwrap();
        assert!(filter.invalid_state_reason().is_none());
        assert!(filter.invalid_settings()["column"].contains("height"));
    }

    #[test]
    fn test_extract_preview_uses_attached_storage() {
        let mut h = Harness::new();
        let fields = vec![
            Field::new("city", FieldType::Text),
            Field::new("population", FieldType::BigInt),
        ];
        h.storage
            .add_entity(
                "cities",
                TupleType::relational(fields),
                vec![vec![Value::from("Basel"), Value::Int(177_000)]],
            )
            .unwrap();
        let known = h.add("relTableExtract", &[("table", json!("cities"))]);
        let unknown = h.add("relTableExtract", &[("table", json!("towns"))]);

        assert!(h.workflow.get(known).unwrap().out_type_preview()[0].is_unknown());
        h.workflow.attach_storage(h.storage.clone());

        let known = h.workflow.get(known).unwrap();
        assert_eq!(
            rel_fields(&known.out_type_preview()[0]),
            vec!["city", "population"]
        );
        let unknown = h.workflow.get(unknown).unwrap();
        assert!(unknown.invalid_settings().contains_key("table"));
    }
}
