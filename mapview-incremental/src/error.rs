//! Engine error type
//!
//! Every variant is terminal for the query that raised it. Nothing is
//! retried inside the engine.

use crate::function::FunctionError;
use mapview_store::StoreError;
use mapview_types::DocId;
use thiserror::Error;

/// Errors surfaced by view queries and updates
#[derive(Error, Debug)]
pub enum Error {
    /// A design document, named view, or registered function is missing
    #[error("not_found: {0}")]
    NotFound(String),

    /// A built-in reducer received a value it cannot aggregate
    #[error("invalid_value: {0}")]
    InvalidValue(String),

    #[error("map function failed on document {doc_id}: {source}")]
    MapFunction {
        doc_id: DocId,
        source: FunctionError,
    },

    #[error("reduce function failed: {source}")]
    ReduceFunction { source: FunctionError },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed view record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable name of the error class
    pub fn name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidValue(_) => "invalid_value",
            Error::MapFunction { .. } => "map_function_error",
            Error::ReduceFunction { .. } => "reduce_function_error",
            Error::Store(_) => "store_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
