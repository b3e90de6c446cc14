//! Conversion between [`Filter`] trees and Mongo-style query documents.
//!
//! ```text
//! { "value": { "$gt": 50 }, "unit": "F" }
//! { "$or": [ { "tags": "roof" }, { "location.floor": { "$gte": 3 } } ] }
//! ```
//!
//! Top-level keys are either combinators (`$and`, `$or`, `$nor`, `$not`) or
//! field paths. A field's value is either an operator document (every key
//! starts with `$`) or a literal for implicit equality.

use serde_json::{Map, Value};

use crate::filter::{Condition, FieldPath, Filter, FilterError};

impl Filter {
    /// Parse a query document.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the document is not an object, uses an
    /// unknown operator, or gives an operator an operand of the wrong shape.
    pub fn from_document(doc: &Value) -> Result<Self, FilterError> {
        let Value::Object(map) = doc else {
            return Err(FilterError::NotAnObject(kind_of(doc).to_string()));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => clauses.push(Filter::And(parse_clauses(key, value)?)),
                "$or" => clauses.push(Filter::Or(parse_clauses(key, value)?)),
                "$nor" => clauses.push(Filter::Nor(parse_clauses(key, value)?)),
                "$not" => clauses.push(Filter::Not(Box::new(Filter::from_document(value)?))),
                op if op.starts_with('$') => {
                    return Err(FilterError::UnknownOperator(op.to_string()));
                }
                path => clauses.extend(parse_field(path, value)?),
            }
        }

        Ok(collapse(clauses))
    }

    /// Render as a query document. Parsing the result yields an equivalent
    /// filter.
    #[must_use]
    pub fn to_document(&self) -> Value {
        match self {
            Filter::All => Value::Object(Map::new()),
            Filter::Field { path, condition } => {
                let mut map = Map::new();
                map.insert(path.to_string(), condition_document(condition));
                Value::Object(map)
            }
            Filter::And(clauses) => combinator("$and", clauses),
            Filter::Or(clauses) => combinator("$or", clauses),
            Filter::Nor(clauses) => combinator("$nor", clauses),
            Filter::Not(inner) => {
                let mut map = Map::new();
                map.insert("$not".to_string(), inner.to_document());
                Value::Object(map)
            }
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = FilterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Filter::from_document(&value)
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        filter.to_document()
    }
}

fn collapse(mut clauses: Vec<Filter>) -> Filter {
    match clauses.len() {
        0 => Filter::All,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    }
}

fn parse_clauses(op: &str, value: &Value) -> Result<Vec<Filter>, FilterError> {
    let Value::Array(items) = value else {
        return Err(FilterError::InvalidOperand {
            op: op.to_string(),
            expected: "an array of filter documents",
        });
    };
    if items.is_empty() {
        return Err(FilterError::EmptyCombinator(op.to_string()));
    }
    items.iter().map(Filter::from_document).collect()
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn parse_field(path: &str, value: &Value) -> Result<Vec<Filter>, FilterError> {
    let path = FieldPath::parse(path);
    if !is_operator_document(value) {
        return Ok(vec![Filter::Field {
            path,
            condition: Condition::Eq(value.clone()),
        }]);
    }

    parse_conditions(value)?
        .into_iter()
        .map(|condition| {
            Ok(Filter::Field {
                path: path.clone(),
                condition,
            })
        })
        .collect()
}

fn parse_conditions(value: &Value) -> Result<Vec<Condition>, FilterError> {
    let Value::Object(ops) = value else {
        return Err(FilterError::NotAnObject(kind_of(value).to_string()));
    };
    ops.iter().map(|(op, operand)| parse_condition(op, operand)).collect()
}

fn parse_condition(op: &str, operand: &Value) -> Result<Condition, FilterError> {
    let condition = match op {
        "$eq" => Condition::Eq(operand.clone()),
        "$ne" => Condition::Ne(operand.clone()),
        "$gt" => Condition::Gt(operand.clone()),
        "$gte" => Condition::Gte(operand.clone()),
        "$lt" => Condition::Lt(operand.clone()),
        "$lte" => Condition::Lte(operand.clone()),
        "$in" => Condition::In(array_operand(op, operand)?),
        "$nin" => Condition::Nin(array_operand(op, operand)?),
        "$exists" => match operand {
            Value::Bool(b) => Condition::Exists(*b),
            _ => {
                return Err(FilterError::InvalidOperand {
                    op: op.to_string(),
                    expected: "a boolean",
                });
            }
        },
        "$not" => {
            if !is_operator_document(operand) {
                return Err(FilterError::InvalidOperand {
                    op: op.to_string(),
                    expected: "an operator document",
                });
            }
            Condition::Not(parse_conditions(operand)?)
        }
        other => return Err(FilterError::UnknownOperator(other.to_string())),
    };
    Ok(condition)
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>, FilterError> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(FilterError::InvalidOperand {
            op: op.to_string(),
            expected: "an array",
        }),
    }
}

fn condition_document(condition: &Condition) -> Value {
    let (op, operand) = match condition {
        Condition::Eq(v) => ("$eq", v.clone()),
        Condition::Ne(v) => ("$ne", v.clone()),
        Condition::Gt(v) => ("$gt", v.clone()),
        Condition::Gte(v) => ("$gte", v.clone()),
        Condition::Lt(v) => ("$lt", v.clone()),
        Condition::Lte(v) => ("$lte", v.clone()),
        Condition::In(vs) => ("$in", Value::Array(vs.clone())),
        Condition::Nin(vs) => ("$nin", Value::Array(vs.clone())),
        Condition::Exists(b) => ("$exists", Value::Bool(*b)),
        Condition::Not(inner) => {
            let mut merged = Map::new();
            for c in inner {
                if let Value::Object(part) = condition_document(c) {
                    merged.extend(part);
                }
            }
            ("$not", Value::Object(merged))
        }
    };
    let mut map = Map::new();
    map.insert(op.to_string(), operand);
    Value::Object(map)
}

fn combinator(op: &str, clauses: &[Filter]) -> Value {
    let mut map = Map::new();
    map.insert(
        op.to_string(),
        Value::Array(clauses.iter().map(Filter::to_document).collect()),
    );
    Value::Object(map)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
