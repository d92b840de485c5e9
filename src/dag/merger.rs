//! Reduction of incoming edge states into a single execution decision.

use super::EdgeState;
use serde::{Deserialize, Serialize};

/// How the states of incoming data edges combine.
///
/// Returns whether the activity can still execute: `false` means it must be skipped.
/// An activity without data inputs is never blocked by them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStateMerger {
    /// Every input must stay active.
    #[default]
    And,
    /// At least one input must stay active.
    Or,
}

impl DataStateMerger {
    pub fn merge(self, states: &[EdgeState]) -> bool {
        match self {
            DataStateMerger::And => !states.contains(&EdgeState::Inactive),
            DataStateMerger::Or => {
                states.is_empty() || states.iter().any(|s| *s != EdgeState::Inactive)
            }
        }
    }
}

/// How the states of incoming control edges combine, split into edges triggered on
/// success and edges triggered on failure of their source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlStateMerger {
    /// All success edges must be active; if fail edges exist, at least one of them must be.
    #[default]
    AndOr,
    /// All control edges must be active.
    AndAnd,
}

impl ControlStateMerger {
    pub fn merge(self, on_success: &[EdgeState], on_fail: &[EdgeState]) -> EdgeState {
        match self {
            ControlStateMerger::AndOr => {
                if on_success.contains(&EdgeState::Inactive) {
                    return EdgeState::Inactive;
                }
                if !on_fail.is_empty() {
                    if on_fail.iter().all(|s| *s == EdgeState::Inactive) {
                        return EdgeState::Inactive;
                    }
                    if !on_fail.contains(&EdgeState::Active) {
                        return EdgeState::Idle;
                    }
                }
                if on_success.contains(&EdgeState::Idle) {
                    EdgeState::Idle
                } else {
                    EdgeState::Active
                }
            }
            ControlStateMerger::AndAnd => {
                let all = || on_success.iter().chain(on_fail);
                if all().any(|s| *s == EdgeState::Inactive) {
                    EdgeState::Inactive
                } else if all().any(|s| *s == EdgeState::Idle) {
                    EdgeState::Idle
                } else {
                    EdgeState::Active
                }
            }
        }
    }
}
