use super::DataModel;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column type of a relational field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    BigInt,
    Double,
    Boolean,
    Text,
    Json,
    Any,
}

impl FieldType {
    /// Whether `value` can be stored in a column of this type. Nullability is checked separately.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::BigInt, Value::Int(_)) => true,
            (FieldType::Double, Value::Double(_) | Value::Int(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Json, Value::Json(_)) => true,
            _ => false,
        }
    }

    /// Parses a literal given as text into a value of this type.
    pub fn parse_literal(self, literal: &str) -> Option<Value> {
        match self {
            FieldType::BigInt => literal.trim().parse().ok().map(Value::Int),
            FieldType::Double => literal.trim().parse().ok().map(Value::Double),
            FieldType::Boolean => literal.trim().parse().ok().map(Value::Bool),
            FieldType::Text => Some(Value::Text(literal.to_string())),
            FieldType::Json => serde_json::from_str(literal).ok().map(Value::Json),
            FieldType::Any => Some(
                serde_json::from_str::<serde_json::Value>(literal)
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::Text(literal.to_string())),
            ),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::BigInt => "BIGINT",
            FieldType::Double => "DOUBLE",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Text => "TEXT",
            FieldType::Json => "JSON",
            FieldType::Any => "ANY",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.field_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// The concrete type of the tuples stored in a checkpoint or sent through a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "camelCase")]
pub enum TupleType {
    Relational { fields: Vec<Field> },
    /// A single JSON column holding one document per tuple.
    Document,
    /// A single JSON column holding one node or edge per tuple.
    Graph,
}

impl TupleType {
    pub fn relational(fields: Vec<Field>) -> Self {
        TupleType::Relational { fields }
    }

    pub fn data_model(&self) -> DataModel {
        match self {
            TupleType::Relational { .. } => DataModel::Relational,
            TupleType::Document => DataModel::Document,
            TupleType::Graph => DataModel::Graph,
        }
    }

    /// Relational fields, empty for documents and graphs.
    pub fn fields(&self) -> &[Field] {
        match self {
            TupleType::Relational { fields } => fields,
            _ => &[],
        }
    }

    /// Number of values in each tuple of this type.
    pub fn arity(&self) -> usize {
        match self {
            TupleType::Relational { fields } => fields.len(),
            _ => 1,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields().iter().map(|f| f.name.as_str()).collect()
    }

    /// Checks that `tuple` has the right arity and value kinds for this type.
    pub fn check_tuple(&self, tuple: &[Value]) -> Result<(), String> {
        if tuple.len() != self.arity() {
            return Err(format!(
                "expected {} values but tuple has {}",
                self.arity(),
                tuple.len()
            ));
        }
        match self {
            TupleType::Relational { fields } => {
                for (field, value) in fields.iter().zip(tuple) {
                    if value.is_null() && !field.nullable {
                        return Err(format!("field '{}' is not nullable", field.name));
                    }
                    if !field.field_type.accepts(value) {
                        return Err(format!(
                            "value '{}' is not valid for field '{}' of type {}",
                            value, field.name, field.field_type
                        ));
                    }
                }
                Ok(())
            }
            _ => match &tuple[0] {
                Value::Json(_) => Ok(()),
                other => Err(format!("expected a JSON value but found '{}'", other)),
            },
        }
    }

    /// Merges relational types of equal arity into the least restrictive common type.
    /// Differing field types widen to `Any`, nullability is combined. Field names are
    /// taken from the first type.
    pub fn least_restrictive(types: &[TupleType]) -> Option<TupleType> {
        let (first, rest) = types.split_first()?;
        match first {
            TupleType::Relational { fields } => {
                let mut merged = fields.clone();
                for other in rest {
                    let TupleType::Relational { fields: other_fields } = other else {
                        return None;
                    };
                    if other_fields.len() != merged.len() {
                        return None;
                    }
                    for (field, other_field) in merged.iter_mut().zip(other_fields) {
                        if field.field_type != other_field.field_type {
                            field.field_type = FieldType::Any;
                        }
                        field.nullable |= other_field.nullable;
                    }
                }
                Some(TupleType::Relational { fields: merged })
            }
            other => rest
                .iter()
                .all(|t| t.data_model() == other.data_model())
                .then(|| other.clone()),
        }
    }
}

impl fmt::Display for TupleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleType::Relational { fields } => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
            TupleType::Document => write!(f, "DOCUMENT"),
            TupleType::Graph => write!(f, "GRAPH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_restrictive_widens_types() {
        let a = TupleType::relational(vec![
            Field::new("id", FieldType::BigInt),
            Field::new("v", FieldType::Double),
        ]);
        let b = TupleType::relational(vec![
            Field::nullable("key", FieldType::BigInt),
            Field::new("v", FieldType::Text),
        ]);
        let merged = TupleType::least_restrictive(&[a, b]).unwrap();
        assert_eq!(merged.field_names(), vec!["id", "v"]);
        assert!(merged.fields()[0].nullable);
        assert_eq!(merged.fields()[1].field_type, FieldType::Any);
    }

    #[test]
    fn test_least_restrictive_rejects_arity_mismatch() {
        let a = TupleType::relational(vec![Field::new("id", FieldType::BigInt)]);
        let b = TupleType::relational(vec![]);
        assert!(TupleType::least_restrictive(&[a, b]).is_none());
        assert!(TupleType::least_restrictive(&[]).is_none());
    }

    #[test]
    fn test_check_tuple() {
        let t = TupleType::relational(vec![Field::new("id", FieldType::BigInt)]);
        assert!(t.check_tuple(&[Value::Int(1)]).is_ok());
        assert!(t.check_tuple(&[Value::Null]).is_err());
        assert!(t.check_tuple(&[Value::Text("x".into())]).is_err());
        assert!(TupleType::Document.check_tuple(&[Value::Json(serde_json::json!({}))]).is_ok());
    }
}
