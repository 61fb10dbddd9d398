//! User-supplied map and reduce functions
//!
//! Functions are capabilities: any value implementing [`MapFunction`] or
//! [`ReduceFunction`] can back a view, and closures with the right shape
//! implement both traits automatically. A map function receives the
//! document and an [`Emitter`]; the engine owns the emitter's buffer for the
//! duration of one document's invocation.

use crate::reduce::BuiltinReduce;
use dashmap::DashMap;
use mapview_collate::normalize_key;
use mapview_types::DocId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Error raised by a user function
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a user function
pub type FunctionResult<T> = Result<T, FunctionError>;

/// One `(key, value)` pair emitted while mapping a document
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedRow {
    pub doc_id: DocId,
    pub key: Value,
    pub value: Value,
    /// Position of this emission within the document's emissions
    pub ordinal: usize,
    /// Copy of the document taken before the map function ran
    pub doc: Arc<Value>,
}

/// Collector handed to a map function
#[derive(Debug)]
pub struct Emitter {
    doc_id: DocId,
    snapshot: Arc<Value>,
    rows: Vec<EmittedRow>,
}

impl Emitter {
    pub(crate) fn new(doc_id: DocId, snapshot: Arc<Value>) -> Self {
        Emitter {
            doc_id,
            snapshot,
            rows: Vec::new(),
        }
    }

    /// Emit a row for the current document
    pub fn emit(&mut self, key: impl Into<Value>, value: impl Into<Value>) {
        let ordinal = self.rows.len();
        self.rows.push(EmittedRow {
            doc_id: self.doc_id.clone(),
            key: normalize_key(&key.into()),
            value: value.into(),
            ordinal,
            doc: Arc::clone(&self.snapshot),
        });
    }

    /// Emit a row whose value is `null`
    pub fn emit_key(&mut self, key: impl Into<Value>) {
        self.emit(key, Value::Null);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn into_rows(self) -> Vec<EmittedRow> {
        self.rows
    }
}

/// A function from a document to zero or more emissions
pub trait MapFunction: Send + Sync {
    fn map(&self, doc: &Value, emitter: &mut Emitter) -> FunctionResult<()>;
}

impl<F> MapFunction for F
where
    F: Fn(&Value, &mut Emitter) -> FunctionResult<()> + Send + Sync,
{
    fn map(&self, doc: &Value, emitter: &mut Emitter) -> FunctionResult<()> {
        self(doc, emitter)
    }
}

/// A function folding a group of values into one
///
/// `keys` holds the `(key, doc id)` of each grouped row; when `rereduce`
/// is set the values are earlier outputs of this same function and `keys`
/// is empty.
pub trait ReduceFunction: Send + Sync {
    fn reduce(&self, keys: &[(Value, DocId)], values: &[Value], rereduce: bool)
        -> FunctionResult<Value>;
}

impl<F> ReduceFunction for F
where
    F: Fn(&[(Value, DocId)], &[Value], bool) -> FunctionResult<Value> + Send + Sync,
{
    fn reduce(
        &self,
        keys: &[(Value, DocId)],
        values: &[Value],
        rereduce: bool,
    ) -> FunctionResult<Value> {
        self(keys, values, rereduce)
    }
}

/// The reduce half of a view
#[derive(Clone)]
pub enum Reduce {
    Builtin(BuiltinReduce),
    Custom(Arc<dyn ReduceFunction>),
}

impl Reduce {
    /// Wrap a closure as a custom reducer
    pub fn custom<F>(function: F) -> Self
    where
        F: Fn(&[(Value, DocId)], &[Value], bool) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        Reduce::Custom(Arc::new(function))
    }
}

impl From<BuiltinReduce> for Reduce {
    fn from(builtin: BuiltinReduce) -> Self {
        Reduce::Builtin(builtin)
    }
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduce::Builtin(builtin) => write!(f, "Builtin({})", builtin.name()),
            Reduce::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Named functions that design documents refer to
///
/// Design documents are plain JSON and cannot carry code, so their `map`
/// and `reduce` fields name functions registered here. Reduce names of
/// the built-in aggregates (`_sum`, `_count`, `_stats`) need no
/// registration.
#[derive(Default)]
pub struct FunctionRegistry {
    maps: DashMap<String, Arc<dyn MapFunction>>,
    reducers: DashMap<String, Arc<dyn ReduceFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_map<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&Value, &mut Emitter) -> FunctionResult<()> + Send + Sync + 'static,
    {
        self.maps.insert(name.into(), Arc::new(function));
    }

    pub fn register_reduce<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&[(Value, DocId)], &[Value], bool) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        self.reducers.insert(name.into(), Arc::new(function));
    }

    pub fn map(&self, name: &str) -> Option<Arc<dyn MapFunction>> {
        self.maps.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolve a reduce name: built-ins first, then registered reducers
    pub fn reduce(&self, name: &str) -> Option<Reduce> {
        if let Some(builtin) = BuiltinReduce::from_name(name) {
            return Some(Reduce::Builtin(builtin));
        }
        self.reducers
            .get(name)
            .map(|entry| Reduce::Custom(Arc::clone(entry.value())))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut maps: Vec<String> = self.maps.iter().map(|e| e.key().clone()).collect();
        let mut reducers: Vec<String> = self.reducers.iter().map(|e| e.key().clone()).collect();
        maps.sort();
        reducers.sort();
        f.debug_struct("FunctionRegistry")
            .field("maps", &maps)
            .field("reducers", &reducers)
            .finish()
    }
}
