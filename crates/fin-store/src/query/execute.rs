//! Collection query evaluation: filter, order, limit.
//!
//! Comparison operators only match values of the same JSON type; a missing or
//! `null` field never satisfies a range comparison. Ordering falls back to the
//! document id so results are deterministic.

use std::cmp::Ordering;

use serde_json::Value;

use crate::types::Document;

use super::types::{CollectionQuery, Filter, FilterOp, SortDirection};

// ============================================================================
// Value Comparison
// ============================================================================

/// Total order over JSON values used by `order_by`.
///
/// Nulls sort after everything else. Numbers compare as `f64`, strings by
/// codepoint, booleans with `false` first. Values of different types order
/// by type: numbers, then strings, then booleans, then arrays and objects.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

// ============================================================================
// Field access
// ============================================================================

/// Resolve a dotted field path (`"meta.category"`) inside `data`.
pub fn get_field<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(data, |current, segment| current.as_object()?.get(segment))
}

// ============================================================================
// Filter evaluation
// ============================================================================

fn number_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        number_eq(a, b)
    } else {
        a == b
    }
}

/// Whether a single filter clause matches `data`.
pub fn matches_filter(data: &Value, filter: &Filter) -> bool {
    let field = get_field(data, &filter.field);
    let operand = &filter.value;

    match filter.op {
        FilterOp::Eq => field.is_some_and(|v| values_equal(v, operand)),
        FilterOp::NotEq => match field {
            None | Some(Value::Null) => false,
            Some(v) => !values_equal(v, operand),
        },
        FilterOp::In => match (field, operand.as_array()) {
            (Some(v), Some(items)) => items.iter().any(|item| values_equal(v, item)),
            _ => false,
        },
        FilterOp::ArrayContains => field
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|item| values_equal(item, operand))),
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
            let Some(v) = field else { return false };
            if v.is_null() || operand.is_null() || !same_type(v, operand) {
                return false;
            }
            let ord = compare_values(v, operand);
            match filter.op {
                FilterOp::Lt => ord == Ordering::Less,
                FilterOp::Lte => ord != Ordering::Greater,
                FilterOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        }
    }
}

/// Whether every filter of `query` matches `data`.
pub fn matches(data: &Value, query: &CollectionQuery) -> bool {
    query.filters().iter().all(|f| matches_filter(data, f))
}

// ============================================================================
// Execution
// ============================================================================

/// Apply `query` to the documents of its collection.
///
/// `docs` are assumed to already belong to `query.collection()`.
pub fn execute(docs: impl IntoIterator<Item = Document>, query: &CollectionQuery) -> Vec<Document> {
    let mut out: Vec<Document> = docs
        .into_iter()
        .filter(|doc| matches(&doc.data, query))
        .collect();

    out.sort_by(|a, b| {
        for order in query.ordering() {
            let av = get_field(&a.data, &order.field).unwrap_or(&Value::Null);
            let bv = get_field(&b.data, &order.field).unwrap_or(&Value::Null);
            let ord = compare_values(av, bv);
            let ord = match order.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    });

    if let Some(limit) = query.max_results() {
        out.truncate(limit);
    }
    out
}
