//! In-memory document store
//!
//! Documents live in a `BTreeMap` keyed by identifier, so range scans are
//! plain ordered walks. Every write bumps a store-wide sequence; deleted
//! documents leave a tombstone behind so the change feed can report them.
//! Stores whose change feed nobody reads, such as the private tables a
//! [`MemoryStoreProvider`] hands out, drop deleted documents outright so
//! they do not grow with every rewrite.

use crate::{ChangeStream, DocumentStore, StoreError, StoreProvider, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use mapview_types::{
    Change, ChangeEvent, ChangesOptions, DocId, RangeRequest, RangeResponse, ScanRow, Seq,
    WriteOp, WriteOutcome, DELETED_FIELD,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    /// `None` marks a tombstone
    doc: Option<Value>,
    seq: Seq,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: BTreeMap<String, Entry>,
    seq: Seq,
}

impl MemoryState {
    fn live_count(&self) -> usize {
        self.docs.values().filter(|entry| entry.doc.is_some()).count()
    }
}

/// A document store held entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    state: RwLock<MemoryState>,
    keep_tombstones: bool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        MemoryStore {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
            keep_tombstones: true,
        }
    }

    /// Create an empty store that forgets deleted documents
    ///
    /// Its change feed never reports deletions.
    pub fn without_tombstones(name: impl Into<String>) -> Self {
        MemoryStore {
            keep_tombstones: false,
            ..MemoryStore::new(name)
        }
    }

    /// Insert or overwrite a document, returning its new sequence
    pub fn put(&self, doc: Value) -> StoreResult<Seq> {
        let outcomes = self.apply(vec![WriteOp::Put(doc)])?;
        Ok(outcomes.last().map(|o| o.seq).unwrap_or_default())
    }

    /// Delete a document, returning the sequence of the tombstone
    pub fn remove(&self, id: impl Into<DocId>) -> StoreResult<Seq> {
        let outcomes = self.apply(vec![WriteOp::Delete(id.into())])?;
        Ok(outcomes.last().map(|o| o.seq).unwrap_or_default())
    }

    /// Current sequence of the store
    pub fn update_seq(&self) -> Seq {
        self.state.read().seq
    }

    /// Number of live documents
    pub fn doc_count(&self) -> usize {
        self.state.read().live_count()
    }

    /// Identifiers of all live documents, in order
    pub fn ids(&self) -> Vec<String> {
        self.state
            .read()
            .docs
            .iter()
            .filter(|(_, entry)| entry.doc.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Validate the whole batch, then apply it under a single lock
    fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        let mut resolved = Vec::with_capacity(ops.len());
        for op in ops {
            let id = op.id().ok_or_else(|| {
                StoreError::InvalidDocument("document is missing an _id".to_string())
            })?;
            let doc = match op {
                WriteOp::Put(doc) if !doc.is_object() => {
                    return Err(StoreError::InvalidDocument(format!(
                        "document {id} is not an object"
                    )));
                }
                WriteOp::Put(doc) if is_tombstone(&doc) => None,
                WriteOp::Put(doc) => Some(doc),
                WriteOp::Delete(_) => None,
            };
            resolved.push((id, doc));
        }

        let mut state = self.state.write();
        let mut outcomes = Vec::with_capacity(resolved.len());
        for (id, doc) in resolved {
            state.seq = state.seq.next();
            let seq = state.seq;
            if doc.is_none() && !self.keep_tombstones {
                state.docs.remove(id.as_str());
            } else {
                state.docs.insert(id.0.clone(), Entry { doc, seq });
            }
            outcomes.push(WriteOutcome { id, seq });
        }
        Ok(outcomes)
    }
}

fn is_tombstone(doc: &Value) -> bool {
    doc.get(DELETED_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

fn bound(key: &Option<String>) -> Bound<&str> {
    match key {
        Some(key) => Bound::Included(key.as_str()),
        None => Bound::Unbounded,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>> {
        let state = self.state.read();
        Ok(state.docs.get(id.as_str()).and_then(|entry| entry.doc.clone()))
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        self.apply(ops)
    }

    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse> {
        let state = self.state.read();
        let (low, high) = if request.descending {
            (&request.end, &request.start)
        } else {
            (&request.start, &request.end)
        };

        let mut response = RangeResponse {
            total_rows: state.live_count(),
            offset: request.skip,
            rows: Vec::new(),
        };

        // BTreeMap::range panics on inverted bounds
        if let (Some(low), Some(high)) = (low, high) {
            if low > high {
                return Ok(response);
            }
        }

        let range = state
            .docs
            .range::<str, _>((bound(low), bound(high)))
            .filter_map(|(id, entry)| entry.doc.as_ref().map(|doc| (id, doc)));
        let ordered: Box<dyn Iterator<Item = (&String, &Value)>> = if request.descending {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        response.rows = ordered
            .skip(request.skip)
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|(id, doc)| ScanRow {
                id: id.clone(),
                doc: request.include_docs.then(|| doc.clone()),
            })
            .collect();
        Ok(response)
    }

    fn changes(&self, since: Seq, options: ChangesOptions) -> ChangeStream {
        let state = self.state.read();
        let mut changed: Vec<(&String, &Entry)> = state
            .docs
            .iter()
            .filter(|(_, entry)| entry.seq > since)
            .collect();
        changed.sort_by_key(|(_, entry)| entry.seq);

        let mut events: Vec<StoreResult<ChangeEvent>> = changed
            .into_iter()
            .map(|(id, entry)| {
                Ok(ChangeEvent::Change(Change {
                    id: DocId::new(id.clone()),
                    seq: entry.seq,
                    deleted: entry.doc.is_none(),
                    doc: entry.doc.clone().filter(|_| options.include_docs),
                    conflicts: Vec::new(),
                }))
            })
            .collect();
        events.push(Ok(ChangeEvent::Complete {
            last_seq: state.seq.max(since),
        }));

        stream::iter(events).boxed()
    }
}

/// Provider handing out [`MemoryStore`]s by name
#[derive(Debug, Default)]
pub struct MemoryStoreProvider {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store with its concrete type, for seeding and inspection
    pub fn open_memory(&self, name: &str) -> Arc<MemoryStore> {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::without_tombstones(name)))
            .clone()
    }

    /// Names of all open stores, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let store: Arc<dyn DocumentStore> = self.open_memory(name);
        Ok(store)
    }

    async fn destroy(&self, name: &str) -> StoreResult<()> {
        if self.stores.remove(name).is_some() {
            tracing::debug!(store = %name, "destroyed memory store");
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.stores.contains_key(name))
    }
}
