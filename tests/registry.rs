//! Registry tests
//!
//! Registration of built-in and custom activity types and the catalog.
//!
mod common;
use common::*;
use polyflow::activities::BUILTIN_ACTIVITY_TYPES;
use polyflow::prelude::*;
use std::sync::Arc;

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let registry = ActivityRegistry::with_builtins().expect("built-in activities are valid");
        assert_eq!(registry.len(), BUILTIN_ACTIVITY_TYPES.len());
        for activity_type in BUILTIN_ACTIVITY_TYPES {
            let info = registry.get(activity_type).expect("registered");
            assert_eq!(info.def().activity_type(), *activity_type);
        }
        let types = registry.activity_types();
        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let result = ActivityRegistry::builder()
            .with_builtin_activities()
            .register(Failing::definition(), || Box::new(Failing))
            .register(Failing::definition(), || Box::new(Failing))
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateType(t)) if t == Failing::TYPE));
    }

    #[test]
    fn test_invalid_definition_fails_build() {
        let definition = ActivityDef::builder(" ", "Blank").build();
        let result = ActivityRegistry::builder()
            .register(definition, || Box::new(Failing))
            .build();
        assert!(matches!(result, Err(RegistryError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_unknown_type() {
        let registry = ActivityRegistry::with_builtins().unwrap();
        assert!(matches!(
            registry.create("relJoin"),
            Err(RegistryError::UnknownType(t)) if t == "relJoin"
        ));

        let mut workflow = Workflow::default();
        let result = workflow.add_activity(&registry, "relJoin");
        assert!(result.is_err());
        assert!(workflow.is_empty());
    }

    #[test]
    fn test_factory_creates_fresh_instances() {
        let calls = Arc::new(Calls::default());
        let registry = test_registry(&calls);
        let mut workflow = Workflow::default();
        let a = workflow.add_activity(&registry, Recorder::TYPE).unwrap();
        let b = workflow.add_activity(&registry, Recorder::TYPE).unwrap();
        assert_ne!(a, b);
        assert_eq!(workflow.len(), 2);
        assert_eq!(registry.len(), BUILTIN_ACTIVITY_TYPES.len() + 4);
    }

    #[test]
    fn test_catalog_serialization() {
        let registry = ActivityRegistry::with_builtins().unwrap();
        let catalog = registry.serialize().unwrap();

        let filter = &catalog["relFilter"];
        assert_eq!(filter["type"], "relFilter");
        assert_eq!(filter["inPorts"][0]["portType"], "REL");
        assert!(filter["settings"].as_array().unwrap().len() >= 3);
        assert_eq!(catalog["relUnion"]["dataStateMerger"], "OR");
        assert_eq!(catalog["setVariable"]["outPorts"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_capabilities_are_probed_once() {
        let registry = ActivityRegistry::with_builtins().unwrap();
        let mut workflow = Workflow::default();
        let values = workflow.add_activity(&registry, "relValues").unwrap();
        let to_doc = workflow.add_activity(&registry, "relToDoc").unwrap();
        let variable = workflow.add_activity(&registry, "setVariable").unwrap();
        let extract = workflow.add_activity(&registry, "relTableExtract").unwrap();

        let caps = workflow.get(values).unwrap().capabilities();
        assert!(caps.fusable && caps.pipeable && !caps.variable_writer);
        let caps = workflow.get(to_doc).unwrap().capabilities();
        assert!(!caps.fusable && caps.pipeable);
        let caps = workflow.get(variable).unwrap().capabilities();
        assert!(caps.variable_writer && !caps.pipeable);
        let caps = workflow.get(extract).unwrap().capabilities();
        assert!(caps.context_consumer && !caps.fusable);
    }

    #[test]
    fn test_capability_lookups_happen_at_construction_only() {
        let mut h = Harness::new();
        let source = values(&mut h.workflow, &h.registry, 3);
        let recorder = h.add(Recorder::TYPE, &[]);
        assert_eq!(Calls::get(&h.calls.capability_lookups), 4);

        h.connect(source, recorder);
        h.workflow.update_all_previews();
        let summary = h.run(engine_config(true, true, 2));
        assert!(summary.is_success());
        assert_eq!(h.state(recorder), ActivityState::Saved);

        let wrapper = h.workflow.get_mut(recorder).unwrap();
        assert_eq!(wrapper.can_fuse(), Some(false));
        assert_eq!(wrapper.can_pipe(), Some(false));
        assert_eq!(wrapper.requests_variable_write(), Some(false));
        assert_eq!(Calls::get(&h.calls.capability_lookups), 4);
    }
}
