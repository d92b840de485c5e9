use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an activity within one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    #[default]
    Idle,
    Queued,
    Executing,
    Skipped,
    Failed,
    Finished,
    /// Finished and its outputs are materialized as checkpoints.
    Saved,
}

impl ActivityState {
    const ALL: [ActivityState; 7] = [
        ActivityState::Idle,
        ActivityState::Queued,
        ActivityState::Executing,
        ActivityState::Skipped,
        ActivityState::Failed,
        ActivityState::Finished,
        ActivityState::Saved,
    ];

    /// The activity ran, successfully or not. Skipped activities were never executed.
    pub fn is_executed(self) -> bool {
        matches!(
            self,
            ActivityState::Failed | ActivityState::Finished | ActivityState::Saved
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, ActivityState::Finished | ActivityState::Saved)
    }

    pub fn is_terminal(self) -> bool {
        self.is_executed() || self == ActivityState::Skipped
    }

    /// Whether the scheduler may move an activity from `self` to `next`.
    pub fn can_transition_to(self, next: ActivityState) -> bool {
        use ActivityState::*;
        matches!(
            (self, next),
            (Idle, Queued)
                | (Queued, Executing)
                | (Queued, Skipped)
                | (Executing, Failed)
                | (Executing, Finished)
                | (Executing, Saved)
        )
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(ActivityState::Idle)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityState::Idle => "IDLE",
            ActivityState::Queued => "QUEUED",
            ActivityState::Executing => "EXECUTING",
            ActivityState::Skipped => "SKIPPED",
            ActivityState::Failed => "FAILED",
            ActivityState::Finished => "FINISHED",
            ActivityState::Saved => "SAVED",
        };
        write!(f, "{}", name)
    }
}

/// Holds the current state of an activity. Only the owning wrapper writes it, any number
/// of [`StateObserver`]s can read it from other threads.
#[derive(Debug, Default)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn get(&self) -> ActivityState {
        ActivityState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ActivityState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    pub(crate) fn observer(&self) -> StateObserver {
        StateObserver(Arc::clone(&self.0))
    }
}

/// Read-only handle on the state of an activity.
#[derive(Debug, Clone)]
pub struct StateObserver(Arc<AtomicU8>);

impl StateObserver {
    pub fn get(&self) -> ActivityState {
        ActivityState::from_u8(self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_sees_updates() {
        let cell = StateCell::default();
        let observer = cell.observer();
        assert_eq!(observer.get(), ActivityState::Idle);
        cell.set(ActivityState::Saved);
        assert_eq!(observer.get(), ActivityState::Saved);
    }

    #[test]
    fn test_u8_encoding_covers_all_states() {
        for state in ActivityState::ALL {
            assert_eq!(ActivityState::from_u8(state.to_u8()), state);
        }
    }
}
