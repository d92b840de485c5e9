use crate::activity::ActivityId;
use crate::model::EdgeModel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime state of an edge during one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeState {
    /// Not yet decided.
    #[default]
    Idle,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Carries the output `from_port` of its source into input `to_port` of its target.
    Data { from_port: usize, to_port: usize },
    /// Orders execution. Active when the source succeeded (`on_success`) or failed.
    Control { on_success: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    from: ActivityId,
    to: ActivityId,
    kind: EdgeKind,
    state: EdgeState,
    ignored: bool,
}

impl Edge {
    pub fn data(from: ActivityId, from_port: usize, to: ActivityId, to_port: usize) -> Self {
        Self::new(from, to, EdgeKind::Data { from_port, to_port })
    }

    pub fn control(from: ActivityId, to: ActivityId, on_success: bool) -> Self {
        Self::new(from, to, EdgeKind::Control { on_success })
    }

    fn new(from: ActivityId, to: ActivityId, kind: EdgeKind) -> Self {
        Self {
            from,
            to,
            kind,
            state: EdgeState::Idle,
            ignored: false,
        }
    }

    pub fn from_model(model: &EdgeModel) -> Self {
        if model.is_control {
            Self::control(model.from_id, model.to_id, model.from_port == 0)
        } else {
            Self::data(model.from_id, model.from_port, model.to_id, model.to_port)
        }
    }

    pub fn to_model(&self) -> EdgeModel {
        let (from_port, to_port, is_control) = match self.kind {
            EdgeKind::Data { from_port, to_port } => (from_port, to_port, false),
            EdgeKind::Control { on_success } => (if on_success { 0 } else { 1 }, 0, true),
        };
        EdgeModel {
            from_id: self.from,
            to_id: self.to,
            from_port,
            to_port,
            is_control,
        }
    }

    pub fn from(&self) -> ActivityId {
        self.from
    }

    pub fn to(&self) -> ActivityId {
        self.to
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, EdgeKind::Data { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self.kind, EdgeKind::Control { .. })
    }

    pub fn from_port(&self) -> Option<usize> {
        match self.kind {
            EdgeKind::Data { from_port, .. } => Some(from_port),
            EdgeKind::Control { .. } => None,
        }
    }

    pub fn to_port(&self) -> Option<usize> {
        match self.kind {
            EdgeKind::Data { to_port, .. } => Some(to_port),
            EdgeKind::Control { .. } => None,
        }
    }

    pub fn on_success(&self) -> Option<bool> {
        match self.kind {
            EdgeKind::Control { on_success } => Some(on_success),
            EdgeKind::Data { .. } => None,
        }
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    pub fn set_state(&mut self, state: EdgeState) {
        self.state = state;
    }

    /// Ignored control edges no longer take part in execution decisions.
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn set_ignored(&mut self, ignored: bool) {
        self.ignored = ignored;
    }

    /// Whether the edge is decided: active, inactive or ignored.
    pub fn is_resolved(&self) -> bool {
        self.ignored || self.state != EdgeState::Idle
    }

    pub fn reset_execution(&mut self) {
        self.state = EdgeState::Idle;
        self.ignored = false;
    }

    /// Two edges are equivalent if they connect the same endpoints the same way,
    /// independent of their runtime state.
    pub fn is_equivalent(&self, other: &Edge) -> bool {
        self.from == other.from && self.to == other.to && self.kind == other.kind
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EdgeKind::Data { from_port, to_port } => {
                write!(f, "{}[{}] -> {}[{}]", self.from, from_port, self.to, to_port)
            }
            EdgeKind::Control { on_success } => write!(
                f,
                "{} -{}-> {}",
                self.from,
                if on_success { "success" } else { "fail" },
                self.to
            ),
        }
    }
}
