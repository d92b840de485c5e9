//! Logical plan fragments produced by fusable activities.
//!
//! A fused submission composes the fragments of all its members into one [`PlanNode`]
//! tree which a [`QueryEngine`] then runs as a single unit.

mod interpreter;

pub use interpreter::PlanInterpreter;

use crate::activity::ActivityId;
use crate::error::ExecutionError;
use crate::storage::StorageManager;
use crate::types::TupleType;
use crate::value::{Tuple, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators available in filter predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl CompareOp {
    pub const ALL: [&'static str; 8] = ["=", "!=", ">", ">=", "<", "<=", "IS NULL", "IS NOT NULL"];

    pub fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => CompareOp::Eq,
            "!=" => CompareOp::NotEq,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::GtEq,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::LtEq,
            "IS NULL" => CompareOp::IsNull,
            "IS NOT NULL" => CompareOp::IsNotNull,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::IsNull => "IS NULL",
            CompareOp::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator ignores its right-hand operand.
    pub fn is_unary(self) -> bool {
        matches!(self, CompareOp::IsNull | CompareOp::IsNotNull)
    }
}

/// `column <op> value`. Comparisons involving null are false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: usize,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn matches(&self, tuple: &[Value]) -> bool {
        let Some(cell) = tuple.get(self.column) else {
            return false;
        };
        match self.op {
            CompareOp::IsNull => cell.is_null(),
            CompareOp::IsNotNull => !cell.is_null(),
            op => match cell.compare(&self.value) {
                Some(ordering) => match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::IsNull | CompareOp::IsNotNull => false,
                },
                None => false,
            },
        }
    }
}

/// Location of a checkpoint that a plan reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub activity_id: ActivityId,
    pub port: usize,
}

/// A node of a logical plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    Scan {
        source: CheckpointRef,
        tuple_type: TupleType,
    },
    Values {
        tuple_type: TupleType,
        rows: Vec<Tuple>,
    },
    Project {
        input: Box<PlanNode>,
        columns: Vec<usize>,
        tuple_type: TupleType,
    },
    Filter {
        input: Box<PlanNode>,
        predicate: Predicate,
    },
    Limit {
        input: Box<PlanNode>,
        offset: usize,
        fetch: Option<usize>,
    },
    Union {
        inputs: Vec<PlanNode>,
        tuple_type: TupleType,
    },
}

impl PlanNode {
    pub fn scan(source: CheckpointRef, tuple_type: TupleType) -> Self {
        PlanNode::Scan { source, tuple_type }
    }

    /// The type of the tuples this node produces.
    pub fn tuple_type(&self) -> &TupleType {
        match self {
            PlanNode::Scan { tuple_type, .. }
            | PlanNode::Values { tuple_type, .. }
            | PlanNode::Project { tuple_type, .. }
            | PlanNode::Union { tuple_type, .. } => tuple_type,
            PlanNode::Filter { input, .. } | PlanNode::Limit { input, .. } => input.tuple_type(),
        }
    }

    pub fn inputs(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::Scan { .. } | PlanNode::Values { .. } => vec![],
            PlanNode::Project { input, .. }
            | PlanNode::Filter { input, .. }
            | PlanNode::Limit { input, .. } => vec![input.as_ref()],
            PlanNode::Union { inputs, .. } => inputs.iter().collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.inputs().iter().map(|i| i.node_count()).sum::<usize>()
    }

    /// Checkpoints read by this plan.
    pub fn scans(&self) -> Vec<CheckpointRef> {
        match self {
            PlanNode::Scan { source, .. } => vec![*source],
            other => other.inputs().iter().flat_map(|i| i.scans()).collect(),
        }
    }

    pub fn display(&self) -> DisplayPlan<'_> {
        DisplayPlan { plan: self }
    }
}

/// Tree rendering of a plan for logs and debugging.
pub struct DisplayPlan<'a> {
    pub plan: &'a PlanNode,
}

impl<'a> fmt::Display for DisplayPlan<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_as_tree(self.plan, f, "", true)
    }
}

impl<'a> DisplayPlan<'a> {
    fn fmt_as_tree(
        &self,
        plan: &PlanNode,
        f: &mut fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> fmt::Result {
        let node_marker = if is_last { "└── " } else { "├── " };
        write!(f, "{}{}", prefix, node_marker)?;
        let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });

        match plan {
            PlanNode::Scan { source, .. } => {
                writeln!(f, "Scan: {}[{}]", source.activity_id, source.port)?
            }
            PlanNode::Values { rows, .. } => writeln!(f, "Values: {} rows", rows.len())?,
            PlanNode::Project { tuple_type, .. } => {
                writeln!(f, "Project: {}", tuple_type.field_names().join(", "))?
            }
            PlanNode::Filter { predicate, .. } => {
                write!(f, "Filter: ${} {}", predicate.column, predicate.op.symbol())?;
                if predicate.op.is_unary() {
                    writeln!(f)?
                } else {
                    writeln!(f, " {}", predicate.value)?
                }
            }
            PlanNode::Limit { offset, fetch, .. } => match fetch {
                Some(fetch) => writeln!(f, "Limit: offset {} fetch {}", offset, fetch)?,
                None => writeln!(f, "Limit: offset {}", offset)?,
            },
            PlanNode::Union { inputs, .. } => writeln!(f, "Union: {} inputs", inputs.len())?,
        }

        let children = plan.inputs();
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.fmt_as_tree(child, f, &child_prefix, i + 1 == count)?;
        }
        Ok(())
    }
}

/// Stream of tuples produced by running a plan.
pub type TupleStream = Box<dyn Iterator<Item = Tuple> + Send>;

/// Runs fused plans. The engine decides how a plan is evaluated.
pub trait QueryEngine: Send + Sync {
    fn execute(
        &self,
        plan: &PlanNode,
        storage: &dyn StorageManager,
    ) -> Result<TupleStream, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_null_semantics() {
        let gt = Predicate {
            column: 0,
            op: CompareOp::Gt,
            value: Value::Int(1),
        };
        assert!(gt.matches(&[Value::Int(2)]));
        assert!(!gt.matches(&[Value::Null]));
        let is_null = Predicate {
            column: 0,
            op: CompareOp::IsNull,
            value: Value::Null,
        };
        assert!(is_null.matches(&[Value::Null]));
    }

    #[test]
    fn test_compare_op_round_trip_symbols() {
        for symbol in CompareOp::ALL {
            assert_eq!(CompareOp::parse(symbol).map(CompareOp::symbol), Some(symbol));
        }
    }
}
