//! Canonical identity for query descriptors.
//!
//! The key is a compact canonical JSON rendering of the descriptor:
//!
//! - object keys are written in sorted order, regardless of how the
//!   `serde_json::Map` was built;
//! - filter clauses are sorted by their own canonical encoding and exact
//!   duplicates are dropped, so clause order never affects the key;
//! - the elements of an `in` operand are sorted and deduplicated the same way;
//! - ordering clauses keep their sequence, since `order by a, b` and
//!   `order by b, a` return different results;
//! - numbers keep serde_json's rendering, so `1` and `1.0` and `"1"` all
//!   produce different keys.

use std::fmt::{self, Write as _};

use serde_json::Value;

use super::types::{CollectionQuery, Filter, FilterOp, QueryDescriptor, SortDirection};

/// Cache index derived from a [`QueryDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the normalized key for `descriptor`. Pure and total.
pub fn normalize(descriptor: &QueryDescriptor) -> NormalizedKey {
    let mut out = String::new();
    match descriptor {
        QueryDescriptor::Document(doc) => {
            out.push_str("doc:");
            write_string(doc.path().as_str(), &mut out);
        }
        QueryDescriptor::Collection(query) => {
            out.push_str("col:");
            write_collection(query, &mut out);
        }
    }
    NormalizedKey(out)
}

fn write_collection(query: &CollectionQuery, out: &mut String) {
    out.push('{');
    out.push_str("\"c\":");
    write_string(query.collection().as_str(), out);

    let mut clauses: Vec<String> = query.filters().iter().map(encode_filter).collect();
    clauses.sort();
    clauses.dedup();
    out.push_str(",\"w\":[");
    out.push_str(&clauses.join(","));
    out.push(']');

    out.push_str(",\"o\":[");
    for (i, order) in query.ordering().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('[');
        write_string(&order.field, out);
        out.push_str(match order.direction {
            SortDirection::Asc => ",\"asc\"]",
            SortDirection::Desc => ",\"desc\"]",
        });
    }
    out.push(']');

    if let Some(limit) = query.max_results() {
        let _ = write!(out, ",\"l\":{limit}");
    }
    out.push('}');
}

fn encode_filter(filter: &Filter) -> String {
    let mut out = String::new();
    out.push('[');
    write_string(&filter.field, &mut out);
    out.push(',');
    write_string(filter.op.as_str(), &mut out);
    out.push(',');
    match (&filter.op, &filter.value) {
        (FilterOp::In, Value::Array(items)) => {
            let mut encoded: Vec<String> = items
                .iter()
                .map(|v| {
                    let mut s = String::new();
                    write_value(v, &mut s);
                    s
                })
                .collect();
            encoded.sort();
            encoded.dedup();
            out.push('[');
            out.push_str(&encoded.join(","));
            out.push(']');
        }
        (_, value) => write_value(value, &mut out),
    }
    out.push(']');
    out
}

fn write_string(s: &str, out: &mut String) {
    // Value's Display is its compact JSON form, escaping included.
    let _ = write!(out, "{}", Value::String(s.to_string()));
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_value(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
