//! Document store interface for mapview
//!
//! The view engine never owns its storage. It consumes a document store
//! through the [`DocumentStore`] trait: point reads, batched writes,
//! ordered range scans over document identifiers, and a sequenced change
//! feed. Stores are opened and destroyed by name through a
//! [`StoreProvider`], which is how the engine provisions the private
//! tables backing each view.
//!
//! [`MemoryStore`] is a complete in-process implementation, used by the
//! test suites and suitable for embedding.

#![warn(missing_debug_implementations)]

pub mod error;
pub mod memory;
pub mod remote;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

pub use error::StoreError;
pub use mapview_types::{
    Change, ChangeEvent, ChangesOptions, DocId, RangeRequest, RangeResponse, ScanRow, Seq,
    WriteOp, WriteOutcome,
};
pub use memory::{MemoryStore, MemoryStoreProvider};
pub use remote::{Method, RemoteRequest, RemoteTransport, Transport};

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A change feed: zero or more [`ChangeEvent::Change`] followed by a
/// single [`ChangeEvent::Complete`]
pub type ChangeStream = BoxStream<'static, StoreResult<ChangeEvent>>;

/// Operations the view engine consumes from a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name the store was opened under
    fn name(&self) -> &str;

    /// How the store is reached; remote stores answer view queries themselves
    fn transport(&self) -> Transport {
        Transport::Local
    }

    /// Fetch a live document
    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>>;

    /// Apply a batch of writes
    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>>;

    /// Scan live documents ordered by identifier
    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse>;

    /// Subscribe to changes after `since`
    fn changes(&self, since: Seq, options: ChangesOptions) -> ChangeStream;
}

/// Opens and destroys named stores
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Open a store, creating it if it does not exist
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>>;

    /// Remove a store and everything in it; a missing store is not an error
    async fn destroy(&self, name: &str) -> StoreResult<()>;

    /// Check whether a store exists
    async fn exists(&self, name: &str) -> StoreResult<bool>;
}
