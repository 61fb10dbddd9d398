//! Shared types for mapview
//!
//! This crate provides the common vocabulary used across the mapview
//! workspace: document identifiers, change-feed events, and the request
//! and response shapes of the document store interface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field holding a document's identifier
pub const ID_FIELD: &str = "_id";

/// Field marking a document as a deletion tombstone
pub const DELETED_FIELD: &str = "_deleted";

/// Document identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the identifier of a JSON document, if it carries one
    pub fn of(doc: &Value) -> Option<Self> {
        doc.get(ID_FIELD).and_then(Value::as_str).map(DocId::new)
    }

    /// Returns true for identifiers under a reserved prefix (design
    /// documents, local documents, ...)
    pub fn is_internal(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        DocId(id.to_string())
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        DocId(id)
    }
}

/// Position in a store's change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(pub u64);

impl Seq {
    /// The position before the first change
    pub const ZERO: Seq = Seq(0);

    pub fn next(self) -> Seq {
        Seq(self.0 + 1)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single entry of a change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: DocId,
    pub seq: Seq,
    #[serde(default)]
    pub deleted: bool,
    /// Full document body, present when requested and not deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    /// Revisions losing a conflict, when requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

/// Event delivered by a change feed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document changed
    Change(Change),

    /// The feed is exhausted; `last_seq` is the newest sequence it covered
    Complete { last_seq: Seq },
}

/// Options for subscribing to a change feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangesOptions {
    pub include_docs: bool,
    pub conflicts: bool,
}

/// A write submitted to a store as part of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or overwrite a document; it must carry an `_id`
    Put(Value),

    /// Remove a document by identifier
    Delete(DocId),
}

impl WriteOp {
    pub fn id(&self) -> Option<DocId> {
        match self {
            WriteOp::Put(doc) => DocId::of(doc),
            WriteOp::Delete(id) => Some(id.clone()),
        }
    }
}

/// Result of one write in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: DocId,
    pub seq: Seq,
}

/// An ordered scan over a store's identifier space
///
/// Bounds are inclusive. When `descending` is set the scan walks from
/// `start` (the high bound) down to `end` (the low bound).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    pub include_docs: bool,
}

impl RangeRequest {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        RangeRequest {
            start,
            end,
            ..Default::default()
        }
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn paginate(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

/// One row of a range scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub id: String,
    pub doc: Option<Value>,
}

/// Response to a range scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResponse {
    /// Number of live documents in the store
    pub total_rows: usize,
    pub offset: usize,
    pub rows: Vec<ScanRow>,
}
