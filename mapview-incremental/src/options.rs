//! Query options and results

use mapview_types::DocId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Options recognized by [`ViewEngine::query`](crate::ViewEngine::query)
///
/// Key bounds distinguish a missing bound (`None`) from an explicit
/// `null` bound (`Some(Value::Null)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    #[serde(deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,

    /// Independent point lookups, concatenated in the given order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<Value>>,

    #[serde(deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub startkey: Option<Value>,

    #[serde(deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub endkey: Option<Value>,

    pub descending: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    pub skip: usize,

    pub include_docs: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_level: Option<usize>,

    /// Defaults to true when the view has a reduce function
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce: Option<bool>,
}

fn deserialize_some<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn keys<I, V>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn startkey(mut self, key: impl Into<Value>) -> Self {
        self.startkey = Some(key.into());
        self
    }

    pub fn endkey(mut self, key: impl Into<Value>) -> Self {
        self.endkey = Some(key.into());
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn group(mut self, group: bool) -> Self {
        self.group = Some(group);
        self
    }

    pub fn group_level(mut self, level: usize) -> Self {
        self.group_level = Some(level);
        self
    }

    pub fn reduce(mut self, reduce: bool) -> Self {
        self.reduce = Some(reduce);
        self
    }
}

/// One row of a query result
///
/// Reduced rows carry no `id`; `doc` is present only with `include_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocId>,
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl ViewRow {
    pub fn reduced(key: Value, value: Value) -> Self {
        ViewRow {
            id: None,
            key,
            value,
            doc: None,
        }
    }
}

/// Result of a view query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub total_rows: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub rows: Vec<ViewRow>,
}

impl QueryResult {
    /// Document identifiers of the rows, in order
    pub fn ids(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|row| row.id.as_ref().map(DocId::as_str))
            .collect()
    }

    /// Keys of the rows, in order
    pub fn keys(&self) -> Vec<&Value> {
        self.rows.iter().map(|row| &row.key).collect()
    }
}
