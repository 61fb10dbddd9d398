//! Grouping and reduction of view rows
//!
//! Rows arrive ordered by key, so groups are runs of consecutive rows whose
//! (possibly truncated) keys collate equal. Each group is folded once
//! through the view's reduce function.

use crate::error::{Error, Result};
use crate::function::Reduce;
use crate::options::{QueryOptions, ViewRow};
use mapview_collate::{collate, normalize_key};
use mapview_types::DocId;
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Aggregates available by name without registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinReduce {
    Sum,
    Count,
    Stats,
}

impl BuiltinReduce {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "_sum" => Some(BuiltinReduce::Sum),
            "_count" => Some(BuiltinReduce::Count),
            "_stats" => Some(BuiltinReduce::Stats),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinReduce::Sum => "_sum",
            BuiltinReduce::Count => "_count",
            BuiltinReduce::Stats => "_stats",
        }
    }

    /// Fold `values`; with `rereduce` the values are earlier outputs of
    /// this same aggregate
    pub fn reduce(&self, values: &[Value], rereduce: bool) -> Result<Value> {
        match (self, rereduce) {
            (BuiltinReduce::Count, false) => Ok(json!(values.len())),
            (BuiltinReduce::Count, true) | (BuiltinReduce::Sum, _) => {
                let numbers = numeric_values(self.name(), values)?;
                Ok(number(numbers.iter().sum()))
            }
            (BuiltinReduce::Stats, false) => {
                let numbers = numeric_values(self.name(), values)?;
                Ok(Stats::of(&numbers).to_value())
            }
            (BuiltinReduce::Stats, true) => {
                let mut merged: Option<Stats> = None;
                for value in values {
                    let partial = Stats::from_value(value)?;
                    merged = Some(match merged {
                        Some(stats) => stats.merge(&partial),
                        None => partial,
                    });
                }
                Ok(merged.unwrap_or_default().to_value())
            }
        }
    }
}

fn numeric_values(name: &str, values: &[Value]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|value| {
            value.as_f64().ok_or_else(|| {
                Error::InvalidValue(format!(
                    "builtin {name} function requires map values to be numbers"
                ))
            })
        })
        .collect()
}

/// JSON number in canonical form (integral results render as integers)
fn number(n: f64) -> Value {
    normalize_key(&json!(n))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Stats {
    sum: f64,
    min: f64,
    max: f64,
    count: f64,
    sumsqr: f64,
}

impl Stats {
    fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Stats::default();
        }
        Stats {
            sum: values.iter().sum(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: values.len() as f64,
            sumsqr: values.iter().map(|v| v * v).sum(),
        }
    }

    fn merge(&self, other: &Stats) -> Self {
        Stats {
            sum: self.sum + other.sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            count: self.count + other.count,
            sumsqr: self.sumsqr + other.sumsqr,
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let field = |name: &str| {
            value.get(name).and_then(Value::as_f64).ok_or_else(|| {
                Error::InvalidValue(format!("_stats rereduce input is missing numeric {name}"))
            })
        };
        Ok(Stats {
            sum: field("sum")?,
            min: field("min")?,
            max: field("max")?,
            count: field("count")?,
            sumsqr: field("sumsqr")?,
        })
    }

    fn to_value(self) -> Value {
        json!({
            "sum": number(self.sum),
            "min": number(self.min),
            "max": number(self.max),
            "count": number(self.count),
            "sumsqr": number(self.sumsqr),
        })
    }
}

/// How rows are partitioned into groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Every row in one group keyed `null`
    All,
    /// One group per distinct key
    Exact,
    /// Array keys truncated to their first `n` elements
    Level(usize),
}

impl Grouping {
    pub fn from_options(options: &QueryOptions) -> Self {
        match (options.group, options.group_level) {
            (_, Some(0)) => Grouping::All,
            (_, Some(level)) => Grouping::Level(level),
            (Some(false), None) => Grouping::All,
            _ => Grouping::Exact,
        }
    }

    fn group_key(&self, key: &Value) -> Value {
        match (self, key) {
            (Grouping::All, _) => Value::Null,
            (Grouping::Level(level), Value::Array(items)) => {
                Value::Array(items.iter().take(*level).cloned().collect())
            }
            _ => key.clone(),
        }
    }
}

/// Transient accumulation of one group's rows
#[derive(Debug)]
struct ReduceGroup {
    group_key: Value,
    members: Vec<(Value, DocId)>,
    values: Vec<Value>,
}

/// Folds ordered rows through a reduce function
#[derive(Debug)]
pub struct Reducer<'a> {
    function: &'a Reduce,
    grouping: Grouping,
}

impl<'a> Reducer<'a> {
    pub fn new(function: &'a Reduce, grouping: Grouping) -> Self {
        Reducer { function, grouping }
    }

    /// Group `rows` and fold each group; the first failure aborts
    pub fn reduce(&self, rows: &[ViewRow]) -> Result<Vec<ViewRow>> {
        let mut groups: Vec<ReduceGroup> = Vec::new();

        for row in rows {
            let group_key = self.grouping.group_key(&row.key);
            let member = (row.key.clone(), row.id.clone().unwrap_or_else(|| DocId::new("")));

            match groups.last_mut() {
                Some(open) if collate(&open.group_key, &group_key) == Ordering::Equal => {
                    open.members.push(member);
                    open.values.push(row.value.clone());
                }
                _ => groups.push(ReduceGroup {
                    group_key,
                    members: vec![member],
                    values: vec![row.value.clone()],
                }),
            }
        }

        groups
            .into_iter()
            .map(|group| {
                let value = self.apply(&group.members, &group.values)?;
                Ok(ViewRow::reduced(group.group_key, value))
            })
            .collect()
    }

    fn apply(&self, keys: &[(Value, DocId)], values: &[Value]) -> Result<Value> {
        match self.function {
            Reduce::Builtin(builtin) => builtin.reduce(values, false),
            Reduce::Custom(function) => function
                .reduce(keys, values, false)
                .map_err(|source| Error::ReduceFunction { source }),
        }
    }
}
