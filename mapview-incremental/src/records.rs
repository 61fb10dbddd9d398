//! Documents persisted in a view's private stores
//!
//! The index store holds one [`IndexRow`] per emission, identified by its
//! encoded composite key. The checkpoint store holds one
//! [`CheckpointEntry`] per source document plus the [`SequenceMarker`].

use crate::function::EmittedRow;
use mapview_collate::to_indexable_string;
use mapview_types::{DocId, Seq};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Identifier of the sequence marker in the checkpoint store
pub const SEQUENCE_MARKER_ID: &str = "_local/last_seq";

/// A materialized emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    /// `encode([key, doc id, value, ordinal])`; the row's identity and
    /// sort position
    #[serde(rename = "_id")]
    pub encoded_key: String,
    pub id: DocId,
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    /// Joined document, or the emitting document's snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl IndexRow {
    pub fn from_emitted(row: &EmittedRow, doc: Value) -> Self {
        IndexRow {
            encoded_key: encode_row_key(&row.key, &row.doc_id, &row.value, row.ordinal),
            id: row.doc_id.clone(),
            key: row.key.clone(),
            value: row.value.clone(),
            doc: Some(doc),
        }
    }
}

/// Order-preserving identity of an index row
pub fn encode_row_key(key: &Value, doc_id: &DocId, value: &Value, ordinal: usize) -> String {
    to_indexable_string(&json!([key, doc_id.as_str(), value, ordinal]))
}

/// The rows a source document currently owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    #[serde(rename = "_id")]
    pub doc_id: DocId,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Last source sequence fully applied to a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMarker {
    pub seq: Seq,
}

impl SequenceMarker {
    pub fn to_doc(self) -> Value {
        json!({"_id": SEQUENCE_MARKER_ID, "seq": self.seq})
    }
}
