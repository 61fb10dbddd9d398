//! Collation of JSON values
//!
//! Defines the total order used by view keys and an encoding of values
//! into strings whose byte order agrees with that total order, so that a
//! document store sorting identifiers lexicographically can serve range
//! queries over collated keys.
//!
//! # Ordering
//!
//! Values are ordered first by type class, then within the class:
//!
//! ```text
//! null < false < true < numbers < strings < arrays < objects
//! ```
//!
//! - Numbers compare by numeric value, regardless of representation.
//! - Strings compare by code point.
//! - Arrays compare element-wise; a prefix sorts before the longer array.
//! - Objects compare pair-wise by key then value in insertion order; fewer
//!   entries sort first.
//!
//! # Encoding
//!
//! Every encoded value is `tag body '\0'`. The terminator is the smallest
//! byte in any encoding, which is what lets composite values (arrays and
//! objects) stay ordered when their elements are concatenated.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

const TERMINATOR: char = '\u{0}';

/// Rank of a value's type class in the collation order
pub fn collation_index(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Compare two values under the collation order
pub fn collate(a: &Value, b: &Value) -> Ordering {
    let by_class = collation_index(a).cmp(&collation_index(b));
    if by_class != Ordering::Equal {
        return by_class;
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => number_value(a).total_cmp(&number_value(b)),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => array_collate(a, b),
        (Value::Object(a), Value::Object(b)) => object_collate(a, b),
        _ => Ordering::Equal,
    }
}

fn array_collate(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let sort = collate(left, right);
        if sort != Ordering::Equal {
            return sort;
        }
    }
    a.len().cmp(&b.len())
}

fn object_collate(a: &Map<String, Value>, b: &Map<String, Value>) -> Ordering {
    for ((ak, av), (bk, bv)) in a.iter().zip(b) {
        let sort = ak.cmp(bk).then_with(|| collate(av, bv));
        if sort != Ordering::Equal {
            return sort;
        }
    }
    a.len().cmp(&b.len())
}

/// Numeric value of a JSON number, with negative zero folded into zero
fn number_value(n: &Number) -> f64 {
    let value = n.as_f64().unwrap_or_default();
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

/// Canonical form of a value used as a key
///
/// Integral floats become integers and negative zero becomes zero, so that
/// equal keys also have equal representations.
pub fn normalize_key(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_key).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_key(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    let value = number_value(n);
    if value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 {
        Number::from(value as i64)
    } else {
        Number::from_f64(value).unwrap_or_else(|| n.clone())
    }
}

/// Encode a value into a string whose byte order matches [`collate`]
pub fn to_indexable_string(value: &Value) -> String {
    let mut out = String::new();
    write_indexable(&mut out, value);
    out
}

fn write_indexable(out: &mut String, value: &Value) {
    out.push(char::from(b'0' + collation_index(value)));
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(if *b { '1' } else { '0' }),
        Value::Number(n) => write_number(out, number_value(n)),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            for item in items {
                write_indexable(out, item);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                // keys are encoded exactly as string values
                out.push('4');
                write_string(out, k);
                out.push(TERMINATOR);
                write_indexable(out, v);
            }
        }
    }
    out.push(TERMINATOR);
}

/// Fixed-width hex of the IEEE-754 bits, flipped so that unsigned order
/// equals numeric order.
fn write_number(out: &mut String, value: f64) {
    let bits = value.to_bits();
    let sortable = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    out.push_str(&format!("{sortable:016x}"));
}

/// Escape the three lowest code points so the terminator stays smallest
fn write_string(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\u{0}' => out.push_str("\u{1}\u{1}"),
            '\u{1}' => out.push_str("\u{1}\u{2}"),
            '\u{2}' => out.push_str("\u{2}\u{2}"),
            c => out.push(c),
        }
    }
}
