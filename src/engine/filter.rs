//! Abstract predicate model
//!
//! A `Predicate` is a boolean expression tree over row attributes and
//! geometry. The decomposition code treats it either as an AND-conjunction of
//! sub-predicates or as one opaque node; which nodes a backend encoder can
//! render natively is described by a [`FilterCapabilities`] value and decided
//! by the pure function [`supported`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::engine::types::{Geometry, Value};

/// Comparison operator for attribute predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Spatial relation operator; all evaluation in this layer is envelope-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialOp {
    Intersects,
    Contains,
    Within,
    Disjoint,
}

/// Boolean expression tree over attributes and geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Tautology: matches every row.
    IncludeAll,
    /// Matches no row. A query carrying this never reaches the backend.
    ExcludeAll,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        attribute: String,
        op: CompareOp,
        value: Value,
    },
    /// SQL LIKE with `%` and `_` wildcards
    Like { attribute: String, pattern: String },
    Null { attribute: String, negated: bool },
    Spatial {
        attribute: String,
        op: SpatialOp,
        geometry: Geometry,
    },
}

impl Predicate {
    pub fn compare(attribute: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self::Compare { attribute: attribute.into(), op, value }
    }

    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like { attribute: attribute.into(), pattern: pattern.into() }
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::Null { attribute: attribute.into(), negated: false }
    }

    pub fn spatial(attribute: impl Into<String>, op: SpatialOp, geometry: Geometry) -> Self {
        Self::Spatial { attribute: attribute.into(), op, geometry }
    }

    pub fn and(parts: Vec<Predicate>) -> Self {
        Self::And(parts)
    }

    pub fn or(parts: Vec<Predicate>) -> Self {
        Self::Or(parts)
    }

    pub fn not(inner: Predicate) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            Predicate::IncludeAll => PredicateKind::IncludeAll,
            Predicate::ExcludeAll => PredicateKind::ExcludeAll,
            Predicate::And(_) => PredicateKind::And,
            Predicate::Or(_) => PredicateKind::Or,
            Predicate::Not(_) => PredicateKind::Not,
            Predicate::Compare { .. } => PredicateKind::Compare,
            Predicate::Like { .. } => PredicateKind::Like,
            Predicate::Null { .. } => PredicateKind::Null,
            Predicate::Spatial { .. } => PredicateKind::Spatial,
        }
    }
}

/// Discriminant of a predicate node, used as a capability key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    IncludeAll,
    ExcludeAll,
    And,
    Or,
    Not,
    Compare,
    Like,
    Null,
    Spatial,
}

/// The predicate node kinds and operators one encoder can render natively
#[derive(Debug, Clone, Default)]
pub struct FilterCapabilities {
    kinds: HashSet<PredicateKind>,
    compare_ops: HashSet<CompareOp>,
    spatial_ops: HashSet<SpatialOp>,
}

impl FilterCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: PredicateKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn with_compare_op(mut self, op: CompareOp) -> Self {
        self.compare_ops.insert(op);
        self
    }

    pub fn with_all_compare_ops(mut self) -> Self {
        for op in [
            CompareOp::Eq,
            CompareOp::Neq,
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
        ] {
            self.compare_ops.insert(op);
        }
        self
    }

    pub fn with_spatial_op(mut self, op: SpatialOp) -> Self {
        self.spatial_ops.insert(op);
        self
    }

    pub fn with_all_spatial_ops(mut self) -> Self {
        for op in [
            SpatialOp::Intersects,
            SpatialOp::Contains,
            SpatialOp::Within,
            SpatialOp::Disjoint,
        ] {
            self.spatial_ops.insert(op);
        }
        self
    }

    fn has_kind(&self, kind: PredicateKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Whether an encoder with the given capabilities can render the whole
/// predicate subtree natively.
pub fn supported(caps: &FilterCapabilities, predicate: &Predicate) -> bool {
    if !caps.has_kind(predicate.kind()) {
        return false;
    }
    match predicate {
        Predicate::IncludeAll | Predicate::ExcludeAll => true,
        Predicate::And(parts) | Predicate::Or(parts) => {
            parts.iter().all(|part| supported(caps, part))
        }
        Predicate::Not(inner) => supported(caps, inner),
        Predicate::Compare { op, .. } => caps.compare_ops.contains(op),
        Predicate::Like { .. } | Predicate::Null { .. } => true,
        Predicate::Spatial { op, .. } => caps.spatial_ops.contains(op),
    }
}

/// Flattens a predicate into its top-level AND-joined conjuncts.
///
/// Nested ANDs are flattened; any non-AND root (including OR and NOT) is one
/// opaque conjunct and is never looked into.
pub fn conjuncts(predicate: &Predicate) -> Vec<Predicate> {
    match predicate {
        Predicate::And(parts) => parts.iter().flat_map(conjuncts).collect(),
        other => vec![other.clone()],
    }
}

/// Evaluates a predicate against one row's attribute map.
///
/// This is the reference semantics for the whole layer: the residual the
/// backend could not execute is applied with this function, and the
/// decomposition invariant is stated in terms of it.
pub fn evaluate(predicate: &Predicate, attributes: &HashMap<String, Value>) -> bool {
    match predicate {
        Predicate::IncludeAll => true,
        Predicate::ExcludeAll => false,
        Predicate::And(parts) => parts.iter().all(|part| evaluate(part, attributes)),
        Predicate::Or(parts) => parts.iter().any(|part| evaluate(part, attributes)),
        Predicate::Not(inner) => !evaluate(inner, attributes),
        Predicate::Compare { attribute, op, value } => {
            match attributes.get(attribute) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            }
        }
        Predicate::Like { attribute, pattern } => match attributes.get(attribute) {
            Some(Value::Text(text)) => like_matches(pattern, text),
            _ => false,
        },
        Predicate::Null { attribute, negated } => {
            let is_null = matches!(attributes.get(attribute), None | Some(Value::Null));
            is_null != *negated
        }
        Predicate::Spatial { attribute, op, geometry } => match attributes.get(attribute) {
            Some(Value::Geometry(actual)) => {
                let lhs = actual.envelope();
                let rhs = geometry.envelope();
                match op {
                    SpatialOp::Intersects => lhs.intersects(&rhs),
                    SpatialOp::Contains => lhs.contains(&rhs),
                    SpatialOp::Within => rhs.contains(&lhs),
                    SpatialOp::Disjoint => !lhs.intersects(&rhs),
                }
            }
            _ => false,
        },
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = match (actual, expected) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
        _ => None,
    };
    match ordering {
        Some(ordering) => match op {
            CompareOp::Eq => ordering.is_eq(),
            CompareOp::Neq => !ordering.is_eq(),
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::Gte => ordering.is_ge(),
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Lte => ordering.is_le(),
        },
        None => false,
    }
}

/// SQL LIKE matching: `%` is any run, `_` is any single character.
fn like_matches(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
