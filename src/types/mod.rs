//! Data models, port types, tuple types and the type preview lattice.

mod preview;
mod tuple;

pub use preview::{TypePreview, merge_out_type_preview};
pub use tuple::{Field, FieldType, TupleType};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The data model of a port or a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataModel {
    Relational,
    Document,
    Graph,
}

impl fmt::Display for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataModel::Relational => write!(f, "REL"),
            DataModel::Document => write!(f, "DOC"),
            DataModel::Graph => write!(f, "LPG"),
        }
    }
}

/// The type accepted or produced by an activity port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
    Any,
    Rel,
    Doc,
    Lpg,
}

impl PortType {
    /// The data model this port is restricted to, or `None` for `Any`.
    pub fn data_model(self) -> Option<DataModel> {
        match self {
            PortType::Any => None,
            PortType::Rel => Some(DataModel::Relational),
            PortType::Doc => Some(DataModel::Document),
            PortType::Lpg => Some(DataModel::Graph),
        }
    }

    pub fn from_data_model(model: DataModel) -> Self {
        match model {
            DataModel::Relational => PortType::Rel,
            DataModel::Document => PortType::Doc,
            DataModel::Graph => PortType::Lpg,
        }
    }

    /// Whether an output port of this type may be connected to an input port of type `input`.
    pub fn can_connect_to(self, input: PortType) -> bool {
        self == PortType::Any || input == PortType::Any || self == input
    }

    /// Whether a preview could be valid on this port. Previews without a data model are
    /// always accepted.
    pub fn could_be_compatible(self, preview: &TypePreview) -> bool {
        match (self.data_model(), preview.data_model()) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }

    /// The preview an output port of this type has before anything is known about it.
    pub fn default_preview(self) -> TypePreview {
        TypePreview::Unknown {
            data_model: self.data_model(),
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data_model() {
            Some(model) => write!(f, "{}", model),
            None => write!(f, "ANY"),
        }
    }
}
