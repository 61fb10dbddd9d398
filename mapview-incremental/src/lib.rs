//! Mapview Incremental View Engine
//!
//! This crate maintains secondary indexes over a document store. A view is
//! a map function (document → emitted `(key, value)` rows) and an optional
//! reduce function; the engine materializes the emitted rows in a private
//! store ordered by collated key and keeps it current by replaying the
//! source store's change feed.
//!
//! # Architecture
//!
//! ```text
//! query(view, options)
//!   → resolve view       (inline definition or `_design/<ddoc>` + registry)
//!   → ViewUpdater        (change feed since checkpoint → index rows)
//!   → QueryExecutor      (options → encoded range scans)
//!   → Reducer            (group + fold, when reducing)
//!   → cleanup            (temporary views only)
//! ```
//!
//! Each view owns two stores obtained from a
//! [`StoreProvider`](mapview_store::StoreProvider): the index, holding one
//! document per emission keyed by `encode([key, doc id, value, ordinal])`,
//! and the checkpoints, holding the keys each source document currently
//! owns plus the last applied sequence. Reprocessing a document always
//! deletes the rows it owned before writing new ones, so replaying the
//! feed from an older checkpoint is safe.
//!
//! ## Key Features
//!
//! - **Incremental**: only documents changed since the checkpoint are mapped
//! - **Collated ordering**: keys of any JSON type sort in one total order
//! - **Built-in reducers**: `_sum`, `_count`, `_stats`, plus custom functions
//! - **Temporary views**: ad-hoc definitions with guaranteed store cleanup
//! - **Remote delegation**: stores reached over the network answer queries
//!   themselves
//!
//! # Example
//!
//! ```rust,ignore
//! use mapview_incremental::prelude::*;
//! use mapview_store::{MemoryStore, MemoryStoreProvider};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! let source = Arc::new(MemoryStore::new("db"));
//! source.put(json!({"_id": "a", "tags": ["x", "y"]}))?;
//!
//! let engine = ViewEngine::new(source, Arc::new(MemoryStoreProvider::new()));
//! let by_tag = ViewDefinition::new(|doc: &Value, emit: &mut Emitter| {
//!     for tag in doc["tags"].as_array().into_iter().flatten() {
//!         emit.emit_key(tag.clone());
//!     }
//!     Ok(())
//! })
//! .with_reduce(BuiltinReduce::Count);
//!
//! let result = engine.query(by_tag, QueryOptions::new()).await?;
//! ```

#![warn(missing_debug_implementations)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod function;
pub mod lifecycle;
pub mod metrics;
pub mod options;
pub mod records;
pub mod reduce;
pub mod remote;
pub mod updater;
pub mod view;

// Re-export main types
pub use config::{ConfigError, EngineConfig};
pub use engine::ViewEngine;
pub use error::{Error, Result};
pub use function::{
    EmittedRow, Emitter, FunctionError, FunctionRegistry, FunctionResult, MapFunction, Reduce,
    ReduceFunction,
};
pub use lifecycle::{StoreNames, ViewHandle};
pub use metrics::{MetricsSnapshot, UpdateMetrics};
pub use options::{QueryOptions, QueryResult, ViewRow};
pub use reduce::{BuiltinReduce, Grouping};
pub use updater::UpdateSummary;
pub use view::{ViewDefinition, ViewRef, ViewSource};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::ViewEngine;
    pub use crate::error::{Error, Result};
    pub use crate::function::{Emitter, FunctionRegistry, FunctionResult, Reduce};
    pub use crate::options::{QueryOptions, QueryResult, ViewRow};
    pub use crate::reduce::BuiltinReduce;
    pub use crate::view::{ViewDefinition, ViewRef};
    pub use mapview_types::DocId;
}
