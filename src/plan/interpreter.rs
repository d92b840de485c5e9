use super::{PlanNode, QueryEngine, TupleStream};
use crate::error::ExecutionError;
use crate::storage::StorageManager;
use tracing::trace;

/// Evaluates plans in memory as a lazy iterator pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanInterpreter;

impl PlanInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn stream(
        &self,
        plan: &PlanNode,
        storage: &dyn StorageManager,
    ) -> Result<TupleStream, ExecutionError> {
        let stream: TupleStream = match plan {
            PlanNode::Scan { source, .. } => {
                Box::new(storage.read_checkpoint(source.activity_id, source.port)?)
            }
            PlanNode::Values { rows, .. } => Box::new(rows.clone().into_iter()),
            PlanNode::Project { input, columns, .. } => {
                let columns = columns.clone();
                let arity = input.tuple_type().arity();
                if let Some(bad) = columns.iter().find(|c| **c >= arity) {
                    return Err(ExecutionError::Plan(format!(
                        "projected column {} does not exist in an input of arity {}",
                        bad, arity
                    )));
                }
                Box::new(
                    self.stream(input, storage)?
                        .map(move |row| columns.iter().map(|c| row[*c].clone()).collect()),
                )
            }
            PlanNode::Filter { input, predicate } => {
                let predicate = predicate.clone();
                Box::new(
                    self.stream(input, storage)?
                        .filter(move |row| predicate.matches(row)),
                )
            }
            PlanNode::Limit {
                input,
                offset,
                fetch,
            } => {
                let rows = self.stream(input, storage)?.skip(*offset);
                let limited: TupleStream = match fetch {
                    Some(fetch) => Box::new(rows.take(*fetch)),
                    None => Box::new(rows),
                };
                limited
            }
            PlanNode::Union { inputs, .. } => {
                let streams = inputs
                    .iter()
                    .map(|i| self.stream(i, storage))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(streams.into_iter().flatten())
            }
        };
        Ok(stream)
    }
}

impl QueryEngine for PlanInterpreter {
    fn execute(
        &self,
        plan: &PlanNode,
        storage: &dyn StorageManager,
    ) -> Result<TupleStream, ExecutionError> {
        trace!(nodes = plan.node_count(), "Interpreting plan\n{}", plan.display());
        self.stream(plan, storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CompareOp, Predicate};
    use crate::storage::InMemoryStorage;
    use crate::types::{Field, FieldType, TupleType};
    use crate::value::Value;

    fn values(n: i64) -> PlanNode {
        PlanNode::Values {
            tuple_type: TupleType::relational(vec![
                Field::new("id", FieldType::BigInt),
                Field::new("name", FieldType::Text),
            ]),
            rows: (0..n)
                .map(|i| vec![Value::Int(i), Value::Text(format!("r{}", i))])
                .collect(),
        }
    }

    #[test]
    fn test_filter_project_limit() {
        let plan = PlanNode::Limit {
            input: Box::new(PlanNode::Project {
                tuple_type: TupleType::relational(vec![Field::new("name", FieldType::Text)]),
                columns: vec![1],
                input: Box::new(PlanNode::Filter {
                    input: Box::new(values(10)),
                    predicate: Predicate {
                        column: 0,
                        op: CompareOp::GtEq,
                        value: Value::Int(5),
                    },
                }),
            }),
            offset: 1,
            fetch: Some(2),
        };
        let storage = InMemoryStorage::new();
        let rows: Vec<_> = PlanInterpreter.execute(&plan, &storage).unwrap().collect();
        assert_eq!(rows, vec![vec![Value::from("r6")], vec![Value::from("r7")]]);
    }

    #[test]
    fn test_union_concatenates() {
        let plan = PlanNode::Union {
            tuple_type: values(0).tuple_type().clone(),
            inputs: vec![values(2), values(3)],
        };
        let storage = InMemoryStorage::new();
        assert_eq!(PlanInterpreter.execute(&plan, &storage).unwrap().count(), 5);
    }
}
