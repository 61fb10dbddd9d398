//! Remote transport
//!
//! A store reached over the network exposes a request channel instead of
//! being indexed locally; view queries against it are forwarded as-is.

use crate::StoreResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// HTTP-style request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A request forwarded to a remote store
///
/// `params` are already serialized values; URL encoding is the
/// transport's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn get(path: impl Into<String>) -> Self {
        RemoteRequest {
            method: Method::Get,
            path: path.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        RemoteRequest {
            method: Method::Post,
            path: path.into(),
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// Request channel to a remote store
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn request(&self, request: RemoteRequest) -> StoreResult<Value>;
}

/// How a store is reached
#[derive(Clone)]
pub enum Transport {
    Local,
    Remote(Arc<dyn RemoteTransport>),
}

impl Transport {
    pub fn is_remote(&self) -> bool {
        matches!(self, Transport::Remote(_))
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Local => write!(f, "Local"),
            Transport::Remote(_) => write!(f, "Remote"),
        }
    }
}
