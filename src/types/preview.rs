use super::{DataModel, Field, TupleType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What is known about the data on a port before execution.
///
/// `Missing` marks an unconnected input, `Inactive` an input whose edge was deactivated.
/// `Unknown` means the port will carry data whose exact type cannot be determined yet,
/// optionally with a known data model. The remaining variants are *present* previews
/// that describe the tuple type, documents and graphs only by name hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypePreview {
    #[default]
    Missing,
    Inactive,
    #[serde(rename_all = "camelCase")]
    Unknown {
        data_model: Option<DataModel>,
    },
    #[serde(rename_all = "camelCase")]
    Rel {
        fields: Vec<Field>,
    },
    #[serde(rename_all = "camelCase")]
    Doc {
        known_fields: BTreeSet<String>,
    },
    #[serde(rename_all = "camelCase")]
    Lpg {
        node_labels: BTreeSet<String>,
        edge_labels: BTreeSet<String>,
        properties: BTreeSet<String>,
    },
}

impl TypePreview {
    pub fn unknown() -> Self {
        TypePreview::Unknown { data_model: None }
    }

    pub fn unknown_of(data_model: DataModel) -> Self {
        TypePreview::Unknown {
            data_model: Some(data_model),
        }
    }

    pub fn doc(known_fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TypePreview::Doc {
            known_fields: known_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The present preview describing `tuple_type` exactly.
    pub fn of_type(tuple_type: &TupleType) -> Self {
        match tuple_type {
            TupleType::Relational { fields } => TypePreview::Rel {
                fields: fields.clone(),
            },
            TupleType::Document => TypePreview::Doc {
                known_fields: BTreeSet::new(),
            },
            TupleType::Graph => TypePreview::Lpg {
                node_labels: BTreeSet::new(),
                edge_labels: BTreeSet::new(),
                properties: BTreeSet::new(),
            },
        }
    }

    /// The tuple type for present previews. Documents and graphs only carry hints, so
    /// their tuple type is the generic one of their model.
    pub fn as_optional(&self) -> Option<TupleType> {
        match self {
            TypePreview::Rel { fields } => Some(TupleType::relational(fields.clone())),
            TypePreview::Doc { .. } => Some(TupleType::Document),
            TypePreview::Lpg { .. } => Some(TupleType::Graph),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, TypePreview::Missing)
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self, TypePreview::Inactive)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypePreview::Unknown { .. })
    }

    /// True for `Missing` and `Inactive`: no data will arrive on this port.
    pub fn is_empty(&self) -> bool {
        self.is_missing() || self.is_inactive()
    }

    pub fn is_present(&self) -> bool {
        matches!(
            self,
            TypePreview::Rel { .. } | TypePreview::Doc { .. } | TypePreview::Lpg { .. }
        )
    }

    pub fn data_model(&self) -> Option<DataModel> {
        match self {
            TypePreview::Missing | TypePreview::Inactive => None,
            TypePreview::Unknown { data_model } => *data_model,
            TypePreview::Rel { .. } => Some(DataModel::Relational),
            TypePreview::Doc { .. } => Some(DataModel::Document),
            TypePreview::Lpg { .. } => Some(DataModel::Graph),
        }
    }

    /// Relational fields of a present relational preview.
    pub fn fields(&self) -> Option<&[Field]> {
        match self {
            TypePreview::Rel { fields } => Some(fields),
            _ => None,
        }
    }

    /// Turns an input preview into a preview that is valid for an output port.
    /// An output is never missing or inactive, so those become `Unknown`.
    pub fn as_out_type(self) -> TypePreview {
        match self {
            TypePreview::Missing | TypePreview::Inactive => TypePreview::unknown(),
            other => other,
        }
    }

    /// Convenience for activities with a single output port.
    pub fn as_out_types(self) -> Vec<TypePreview> {
        vec![self.as_out_type()]
    }

    /// Whether this document or graph preview carries strictly more name hints than `other`
    /// while containing all of `other`'s hints.
    fn refines(&self, other: &TypePreview) -> bool {
        match (self, other) {
            (TypePreview::Doc { known_fields: a }, TypePreview::Doc { known_fields: b }) => {
                a.len() > b.len() && a.is_superset(b)
            }
            (
                TypePreview::Lpg {
                    node_labels: an,
                    edge_labels: ae,
                    properties: ap,
                },
                TypePreview::Lpg {
                    node_labels: bn,
                    edge_labels: be,
                    properties: bp,
                },
            ) => {
                let contains = an.is_superset(bn) && ae.is_superset(be) && ap.is_superset(bp);
                contains && (an.len() + ae.len() + ap.len() > bn.len() + be.len() + bp.len())
            }
            _ => false,
        }
    }
}

/// Combines the previously published output previews with freshly computed ones.
///
/// A present preview is never replaced by a missing, inactive or unknown one, and document
/// or graph previews keep their richer hints. Relational previews always take the new value.
pub fn merge_out_type_preview(old: &[TypePreview], new: Vec<TypePreview>) -> Vec<TypePreview> {
    new.into_iter()
        .enumerate()
        .map(|(i, fresh)| match old.get(i) {
            Some(previous) if previous.is_present() && !fresh.is_present() => previous.clone(),
            Some(previous) if previous.refines(&fresh) => previous.clone(),
            _ => fresh,
        })
        .collect()
}

impl fmt::Display for TypePreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(set: &BTreeSet<String>) -> String {
            set.iter().cloned().collect::<Vec<_>>().join(", ")
        }
        match self {
            TypePreview::Missing => write!(f, "MISSING"),
            TypePreview::Inactive => write!(f, "INACTIVE"),
            TypePreview::Unknown { data_model: None } => write!(f, "UNKNOWN"),
            TypePreview::Unknown {
                data_model: Some(model),
            } => write!(f, "UNKNOWN {}", model),
            TypePreview::Rel { fields } => {
                write!(f, "{}", TupleType::relational(fields.clone()))
            }
            TypePreview::Doc { known_fields } => write!(f, "DOC {{{}}}", join(known_fields)),
            TypePreview::Lpg {
                node_labels,
                edge_labels,
                properties,
            } => write!(
                f,
                "LPG nodes {{{}}} edges {{{}}} properties {{{}}}",
                join(node_labels),
                join(edge_labels),
                join(properties)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    #[test]
    fn test_as_out_type_replaces_empty_previews() {
        assert_eq!(TypePreview::Missing.as_out_type(), TypePreview::unknown());
        assert_eq!(TypePreview::Inactive.as_out_type(), TypePreview::unknown());
        let doc = TypePreview::unknown_of(DataModel::Document);
        assert_eq!(doc.clone().as_out_type(), doc);
    }

    #[test]
    fn test_merge_keeps_richer_document_hints() {
        let old = vec![TypePreview::doc(["a", "b"])];
        let merged = merge_out_type_preview(&old, vec![TypePreview::doc(["a"])]);
        assert_eq!(merged, old);

        let merged = merge_out_type_preview(&old, vec![TypePreview::doc(["c"])]);
        assert_eq!(merged, vec![TypePreview::doc(["c"])]);
    }

    #[test]
    fn test_merge_replaces_relational() {
        let old = vec![TypePreview::Rel {
            fields: vec![Field::new("a", FieldType::BigInt), Field::new("b", FieldType::Text)],
        }];
        let fresh = vec![TypePreview::Rel {
            fields: vec![Field::new("a", FieldType::BigInt)],
        }];
        assert_eq!(merge_out_type_preview(&old, fresh.clone()), fresh);
    }
}
