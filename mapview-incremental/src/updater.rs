//! Change-feed driven view maintenance
//!
//! An update pass replays the source change feed from the view's
//! sequence marker. Every changed document first loses the rows it
//! previously owned, then (unless deleted) is mapped again and its new
//! rows written. Documents are processed concurrently; the marker only
//! moves once all of them have landed.

use crate::error::{Error, Result};
use crate::function::Emitter;
use crate::lifecycle::ViewHandle;
use crate::metrics::UpdateMetrics;
use crate::records::{CheckpointEntry, IndexRow, SequenceMarker, SEQUENCE_MARKER_ID};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use mapview_store::{DocumentStore, StoreError};
use mapview_types::{Change, ChangeEvent, ChangesOptions, DocId, Seq, WriteOp, ID_FIELD};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Identifiers starting with this prefix are never indexed
pub const INTERNAL_PREFIX: &str = "_";

/// What one update pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Marker the pass started from
    pub since: Seq,
    /// Marker after the pass
    pub last_seq: Seq,
    pub docs_indexed: usize,
    pub docs_removed: usize,
    pub rows_written: usize,
    pub rows_removed: usize,
}

impl UpdateSummary {
    pub fn is_noop(&self) -> bool {
        self.since == self.last_seq
    }
}

#[derive(Debug, Default)]
struct DocOutcome {
    deleted: bool,
    stale_rows: usize,
    rows_written: usize,
}

/// Brings one view's index up to date with its source
pub struct ViewUpdater<'a> {
    source: &'a dyn DocumentStore,
    view: &'a ViewHandle,
    metrics: &'a UpdateMetrics,
    max_concurrent_docs: usize,
}

impl<'a> ViewUpdater<'a> {
    pub fn new(
        source: &'a dyn DocumentStore,
        view: &'a ViewHandle,
        metrics: &'a UpdateMetrics,
        max_concurrent_docs: usize,
    ) -> Self {
        ViewUpdater {
            source,
            view,
            metrics,
            max_concurrent_docs: max_concurrent_docs.max(1),
        }
    }

    /// Run one pass; repeating it with no intervening source changes is
    /// a no-op
    #[instrument(skip(self), fields(view = %self.view.name()))]
    pub async fn run(&self) -> Result<UpdateSummary> {
        let started = Instant::now();
        let since = self.read_marker().await?;
        let (changes, last_seq) = self.collect_changes(since).await?;
        debug!(%since, %last_seq, changes = changes.len(), "Replaying change feed");

        let outcomes: Vec<DocOutcome> = stream::iter(changes.into_iter().map(|c| self.apply(c)))
            .buffer_unordered(self.max_concurrent_docs)
            .try_collect()
            .await?;

        // Every document has landed; only now may the marker move.
        if last_seq > since {
            self.view
                .checkpoints()
                .bulk_write(vec![WriteOp::Put(SequenceMarker { seq: last_seq }.to_doc())])
                .await?;
        }

        let mut summary = UpdateSummary {
            since,
            last_seq: last_seq.max(since),
            ..Default::default()
        };
        for outcome in &outcomes {
            if outcome.deleted {
                summary.docs_removed += 1;
            } else {
                summary.docs_indexed += 1;
            }
            summary.rows_written += outcome.rows_written;
            summary.rows_removed += outcome.stale_rows;
        }

        self.metrics.record_sweep(started.elapsed());
        if !summary.is_noop() {
            info!(
                since = %summary.since,
                last_seq = %summary.last_seq,
                indexed = summary.docs_indexed,
                removed = summary.docs_removed,
                rows = summary.rows_written,
                "View updated"
            );
        }
        Ok(summary)
    }

    async fn read_marker(&self) -> Result<Seq> {
        let marker = self
            .view
            .checkpoints()
            .get(&DocId::new(SEQUENCE_MARKER_ID))
            .await?;
        match marker {
            Some(doc) => Ok(serde_json::from_value::<SequenceMarker>(doc)?.seq),
            None => Ok(Seq::ZERO),
        }
    }

    /// Drain the feed, keeping only the latest change of each document
    async fn collect_changes(&self, since: Seq) -> Result<(Vec<Change>, Seq)> {
        let options = ChangesOptions {
            include_docs: true,
            conflicts: true,
        };
        let mut feed = self.source.changes(since, options);
        let mut latest: HashMap<DocId, Change> = HashMap::new();

        while let Some(event) = feed.next().await {
            match event? {
                ChangeEvent::Change(change) => {
                    if change.id.is_internal(INTERNAL_PREFIX) {
                        continue;
                    }
                    match latest.get(&change.id) {
                        Some(seen) if seen.seq >= change.seq => {}
                        _ => {
                            latest.insert(change.id.clone(), change);
                        }
                    }
                }
                ChangeEvent::Complete { last_seq } => {
                    let mut changes: Vec<Change> = latest.into_values().collect();
                    changes.sort_by_key(|change| change.seq);
                    return Ok((changes, last_seq));
                }
            }
        }

        Err(StoreError::Unavailable(format!(
            "change feed of {} ended without completing",
            self.source.name()
        ))
        .into())
    }

    /// Replace everything `change.id` contributes to the index
    async fn apply(&self, change: Change) -> Result<DocOutcome> {
        let index = self.view.index();
        let checkpoints = self.view.checkpoints();
        let mut outcome = DocOutcome::default();

        let previous = match checkpoints.get(&change.id).await? {
            Some(doc) => Some(serde_json::from_value::<CheckpointEntry>(doc)?),
            None => None,
        };
        let stale: Vec<String> = previous.map(|entry| entry.keys).unwrap_or_default();
        outcome.stale_rows = stale.len();

        let doc = match change.doc {
            Some(doc) if !change.deleted => doc,
            _ => {
                outcome.deleted = true;
                self.remove(&change.id, stale).await?;
                self.metrics.record_removed_doc();
                self.metrics.record_stale_rows(outcome.stale_rows);
                return Ok(outcome);
            }
        };

        let rows = self.map_document(&change.id, &doc).await?;
        outcome.rows_written = rows.len();

        let new_keys: Vec<String> = rows.iter().map(|row| row.encoded_key.clone()).collect();
        let stale_set: HashSet<&str> = stale.iter().map(String::as_str).collect();
        let added: Vec<String> = new_keys
            .iter()
            .filter(|key| !stale_set.contains(key.as_str()))
            .cloned()
            .collect();
        let unchanged = added.is_empty() && stale.len() == new_keys.len();

        // The entry must cover every row the index might hold for this
        // document, so it grows before the index batch and shrinks after.
        if !added.is_empty() {
            let mut covering = stale.clone();
            covering.extend(added);
            checkpoints
                .bulk_write(vec![entry_put(&change.id, covering)?])
                .await?;
        }

        // Stale rows go first so a key emitted again survives the batch.
        let mut ops: Vec<WriteOp> = stale
            .into_iter()
            .map(|key| WriteOp::Delete(DocId::new(key)))
            .collect();
        for row in rows {
            ops.push(WriteOp::Put(serde_json::to_value(row)?));
        }
        if !ops.is_empty() {
            index.bulk_write(ops).await?;
        }

        if !unchanged {
            let entry_op = if new_keys.is_empty() {
                WriteOp::Delete(change.id.clone())
            } else {
                entry_put(&change.id, new_keys)?
            };
            checkpoints.bulk_write(vec![entry_op]).await?;
        }

        self.metrics.record_indexed(outcome.rows_written);
        self.metrics.record_stale_rows(outcome.stale_rows);
        Ok(outcome)
    }

    async fn remove(&self, id: &DocId, stale: Vec<String>) -> Result<()> {
        if stale.is_empty() {
            return Ok(());
        }
        let ops = stale
            .into_iter()
            .map(|key| WriteOp::Delete(DocId::new(key)))
            .collect();
        self.view.index().bulk_write(ops).await?;
        self.view
            .checkpoints()
            .bulk_write(vec![WriteOp::Delete(id.clone())])
            .await?;
        Ok(())
    }

    /// Run the map function and resolve joined documents
    async fn map_document(&self, id: &DocId, doc: &Value) -> Result<Vec<IndexRow>> {
        let snapshot = Arc::new(doc.clone());
        let mut emitter = Emitter::new(id.clone(), Arc::clone(&snapshot));
        self.view
            .definition()
            .map_function()
            .map(doc, &mut emitter)
            .map_err(|source| Error::MapFunction {
                doc_id: id.clone(),
                source,
            })?;

        let emitted = emitter.into_rows();
        let rows = emitted.iter().map(|row| async move {
            let joined = match join_target(&row.value) {
                Some(target) => self.source.get(&target).await?,
                None => None,
            };
            let doc = joined.unwrap_or_else(|| (*row.doc).clone());
            Ok::<_, Error>(IndexRow::from_emitted(row, doc))
        });
        try_join_all(rows).await
    }
}

fn entry_put(doc_id: &DocId, keys: Vec<String>) -> Result<WriteOp> {
    let entry = CheckpointEntry {
        doc_id: doc_id.clone(),
        keys,
    };
    Ok(WriteOp::Put(serde_json::to_value(entry)?))
}

/// The document an emitted value refers to: objects carrying a string `_id`
fn join_target(value: &Value) -> Option<DocId> {
    value
        .as_object()
        .and_then(|object| object.get(ID_FIELD))
        .and_then(Value::as_str)
        .map(DocId::new)
}

impl std::fmt::Debug for ViewUpdater<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewUpdater")
            .field("view", &self.view.name())
            .field("max_concurrent_docs", &self.max_concurrent_docs)
            .finish()
    }
}
