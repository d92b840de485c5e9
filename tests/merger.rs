//! Edge state merger tests
//!
//! Properties of the data and control state mergers and of `can_execute`.
//!
mod common;
use common::*;
use polyflow::prelude::*;
use proptest::prelude::*;

fn edge_state() -> impl Strategy<Value = EdgeState> {
    prop_oneof![
        Just(EdgeState::Idle),
        Just(EdgeState::Active),
        Just(EdgeState::Inactive),
    ]
}

fn states() -> impl Strategy<Value = Vec<EdgeState>> {
    prop::collection::vec(edge_state(), 0..6)
}

#[cfg(test)]
mod merger_tests {
    use super::*;

    proptest! {
        #[test]
        fn test_and_blocks_on_any_inactive(states in states()) {
            let expected = !states.contains(&EdgeState::Inactive);
            prop_assert_eq!(DataStateMerger::And.merge(&states), expected);
        }

        #[test]
        fn test_or_needs_one_live_input(states in states()) {
            let expected = states.is_empty() || states.iter().any(|s| *s != EdgeState::Inactive);
            prop_assert_eq!(DataStateMerger::Or.merge(&states), expected);
        }

        #[test]
        fn test_or_is_at_least_as_permissive_as_and(states in states()) {
            if DataStateMerger::And.merge(&states) {
                prop_assert!(DataStateMerger::Or.merge(&states));
            }
        }

        #[test]
        fn test_and_and_treats_all_edges_alike(success in states(), fail in states()) {
            let all: Vec<EdgeState> = success.iter().chain(&fail).copied().collect();
            let merged = ControlStateMerger::AndAnd.merge(&success, &fail);
            if all.contains(&EdgeState::Inactive) {
                prop_assert_eq!(merged, EdgeState::Inactive);
            } else if all.contains(&EdgeState::Idle) {
                prop_assert_eq!(merged, EdgeState::Idle);
            } else {
                prop_assert_eq!(merged, EdgeState::Active);
            }
        }

        #[test]
        fn test_and_or_needs_every_success_edge(success in states(), fail in states()) {
            let merged = ControlStateMerger::AndOr.merge(&success, &fail);
            if success.contains(&EdgeState::Inactive) {
                prop_assert_eq!(merged, EdgeState::Inactive);
            }
            if merged == EdgeState::Active {
                prop_assert!(success.iter().all(|s| *s == EdgeState::Active));
                prop_assert!(fail.is_empty() || fail.contains(&EdgeState::Active));
            }
        }

        #[test]
        fn test_and_or_blocks_when_every_fail_edge_is_inactive(
            success in prop::collection::vec(Just(EdgeState::Active), 0..3),
            fail in prop::collection::vec(Just(EdgeState::Inactive), 1..4),
        ) {
            prop_assert_eq!(ControlStateMerger::AndOr.merge(&success, &fail), EdgeState::Inactive);
        }
    }

    #[test]
    fn test_and_or_without_control_edges_is_active() {
        assert_eq!(ControlStateMerger::AndOr.merge(&[], &[]), EdgeState::Active);
        assert_eq!(ControlStateMerger::AndAnd.merge(&[], &[]), EdgeState::Active);
    }

    #[test]
    fn test_and_or_waits_for_undecided_fail_edges() {
        let merged = ControlStateMerger::AndOr.merge(
            &[EdgeState::Active],
            &[EdgeState::Idle, EdgeState::Inactive],
        );
        assert_eq!(merged, EdgeState::Idle);
    }

    #[test]
    fn test_can_execute_ignores_ignored_edges() {
        let mut h = Harness::new();
        let source = h.add(CountingSource::TYPE, &[]);
        let guard = h.add(Recorder::TYPE, &[]);
        let target = h.add(Recorder::TYPE, &[]);
        h.connect(source, target);
        let wrapper = h.workflow.get(target).unwrap();

        let mut data = Edge::data(source, 0, target, 0);
        data.set_state(EdgeState::Active);
        let mut control = Edge::control(guard, target, true);
        control.set_state(EdgeState::Inactive);
        assert_eq!(wrapper.can_execute(&[&data, &control]), EdgeState::Inactive);

        control.set_ignored(true);
        assert_eq!(wrapper.can_execute(&[&data, &control]), EdgeState::Active);
    }

    #[test]
    fn test_can_execute_data_decides_before_control() {
        let mut h = Harness::new();
        let source = h.add(CountingSource::TYPE, &[]);
        let guard = h.add(Recorder::TYPE, &[]);
        let target = h.add(Recorder::TYPE, &[]);
        let wrapper = h.workflow.get(target).unwrap();

        let mut data = Edge::data(source, 0, target, 0);
        data.set_state(EdgeState::Inactive);
        let control = Edge::control(guard, target, true);
        assert_eq!(wrapper.can_execute(&[&data, &control]), EdgeState::Inactive);

        data.set_state(EdgeState::Idle);
        assert_eq!(wrapper.can_execute(&[&data, &control]), EdgeState::Idle);
    }

    #[test]
    fn test_union_uses_or_merger() {
        let mut h = Harness::new();
        let union = h.add("relUnion", &[]);
        let wrapper = h.workflow.get(union).unwrap();
        assert_eq!(wrapper.data_state_merger(), DataStateMerger::Or);

        let a = h.add(CountingSource::TYPE, &[]);
        let b = h.add(CountingSource::TYPE, &[]);
        let wrapper = h.workflow.get(union).unwrap();
        let mut first = Edge::data(a, 0, union, 0);
        first.set_state(EdgeState::Inactive);
        let mut second = Edge::data(b, 0, union, 1);
        second.set_state(EdgeState::Active);
        assert_eq!(wrapper.can_execute(&[&first, &second]), EdgeState::Active);

        second.set_state(EdgeState::Inactive);
        assert_eq!(wrapper.can_execute(&[&first, &second]), EdgeState::Inactive);
    }
}
