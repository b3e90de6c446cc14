//! Declarative filter predicates.
//!
//! A [`Filter`] is an expression tree over an item's document form. Leaves
//! test a single field ([`Condition`] at a [`FieldPath`]); inner nodes combine
//! leaves with `and`/`or`/`nor`/`not`. Evaluation is pure and total: an item
//! that fails every clause yields `false`, never an error.
//!
//! Field semantics:
//!
//! - A path that resolves to nothing is a *missing* field. Only absence tests
//!   (`$exists: false`, equality with `null`) and negations (`$ne`, `$nin`,
//!   `$not`) can match a missing field.
//! - When a path resolves to an array, equality, comparison and membership
//!   match if the array itself or any of its elements match.
//! - Ordering comparisons are defined between two numbers or two strings;
//!   anything else does not match.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::item::Item;

/// Errors produced when parsing a filter document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    /// The filter (or a nested clause) was not a JSON object.
    #[error("filter must be an object, got {0}")]
    NotAnObject(String),

    /// An operator this matcher does not know.
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    /// An operator was given an operand of the wrong shape.
    #[error("operator {op} expects {expected}")]
    InvalidOperand {
        /// The operator, e.g. `$in`.
        op: String,
        /// Description of the accepted operand.
        expected: &'static str,
    },

    /// `$and`, `$or` or `$nor` with no clauses.
    #[error("operator {0} requires at least one clause")]
    EmptyCombinator(String),
}

/// A dotted path into a document, e.g. `location.city`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Every value the path resolves to in `doc`. Empty when missing.
    #[must_use]
    pub fn resolve<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        resolve_into(doc, &self.segments, &mut out);
        out
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

fn resolve_into<'a>(doc: &'a Value, segments: &[String], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(doc);
        return;
    };
    match doc {
        Value::Object(map) => {
            if let Some(next) = map.get(head) {
                resolve_into(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    resolve_into(next, rest, out);
                }
            } else {
                // Descend into embedded documents.
                for item in items.iter().filter(|v| v.is_object()) {
                    resolve_into(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// A test applied to the value(s) found at one field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equal to the operand. `null` also matches a missing field.
    Eq(Value),
    /// Not equal to the operand; matches a missing field.
    Ne(Value),
    /// Strictly greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Strictly less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Equal to any of the operands.
    In(Vec<Value>),
    /// Equal to none of the operands; matches a missing field.
    Nin(Vec<Value>),
    /// Field presence (`true`) or absence (`false`).
    Exists(bool),
    /// Negation of the conjunction of the inner conditions.
    Not(Vec<Condition>),
}

impl Condition {
    /// Evaluate against the values a path resolved to.
    #[must_use]
    pub fn evaluate(&self, found: &[&Value]) -> bool {
        match self {
            Condition::Eq(Value::Null) if found.is_empty() => true,
            Condition::Eq(expected) => any_candidate(found, |v| values_equal(v, expected)),
            Condition::Ne(expected) => !Condition::Eq(expected.clone()).evaluate(found),
            Condition::Gt(bound) => any_ordered(found, bound, Ordering::is_gt),
            Condition::Gte(bound) => any_ordered(found, bound, Ordering::is_ge),
            Condition::Lt(bound) => any_ordered(found, bound, Ordering::is_lt),
            Condition::Lte(bound) => any_ordered(found, bound, Ordering::is_le),
            Condition::In(options) => options
                .iter()
                .any(|option| Condition::Eq(option.clone()).evaluate(found)),
            Condition::Nin(options) => !Condition::In(options.clone()).evaluate(found),
            Condition::Exists(expected) => !found.is_empty() == *expected,
            Condition::Not(inner) => !inner.iter().all(|c| c.evaluate(found)),
        }
    }
}

/// Each resolved value, plus the elements of any resolved array.
fn any_candidate(found: &[&Value], mut test: impl FnMut(&Value) -> bool) -> bool {
    found.iter().copied().any(|v| {
        test(v)
            || match v {
                Value::Array(items) => items.iter().any(&mut test),
                _ => false,
            }
    })
}

fn any_ordered(found: &[&Value], bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    any_candidate(found, |v| compare(v, bound).is_some_and(accept))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Integers compare exactly; a float on either side compares as `f64`.
fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    match (integer(x), integer(y)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// A predicate over an item's document form.
///
/// Serialised as a Mongo-style query document; see [`crate::document`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Filter {
    /// Matches every document (`{}`).
    #[default]
    All,
    /// A single field test.
    Field {
        /// Where to look.
        path: FieldPath,
        /// What to test.
        condition: Condition,
    },
    /// Every clause matches.
    And(Vec<Filter>),
    /// At least one clause matches.
    Or(Vec<Filter>),
    /// No clause matches.
    Nor(Vec<Filter>),
    /// The inner filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Shorthand for a field test.
    #[must_use]
    pub fn field(path: &str, condition: Condition) -> Self {
        Filter::Field {
            path: FieldPath::parse(path),
            condition,
        }
    }

    /// Evaluate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Field { path, condition } => condition.evaluate(&path.resolve(doc)),
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Nor(clauses) => !clauses.iter().any(|c| c.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
        }
    }

    /// Evaluate against an item's document form.
    #[must_use]
    pub fn matches_item(&self, item: &Item) -> bool {
        self.matches(&item.to_document())
    }

    /// The subset of `candidates` that match, in order.
    #[must_use]
    pub fn select<'a>(&self, candidates: &'a [Item]) -> Vec<&'a Item> {
        candidates.iter().filter(|c| self.matches_item(c)).collect()
    }
}
