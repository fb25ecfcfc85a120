//! Versioned response store for Shellcache
//!
//! This module provides the abstraction the worker persists responses
//! through: named partitions (one per cache version), each mapping a
//! request identity to a stored HTTP response.

pub mod hash;
pub mod memory;
pub mod sqlite;

use crate::http::{RequestDescriptor, ResponseDescriptor};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Error type for response store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Digest mismatch for {key}: expected {expected}, got {actual}")]
    DigestMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Corrupt entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Identity a response is stored under: method plus URL without fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn from_request(request: &RequestDescriptor) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub(crate) fn from_parts(method: String, url: String) -> Self {
        Self { method, url }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Trait for persistent storage of responses, partitioned by cache version
///
/// Implementations must tolerate concurrent calls from many in-flight
/// fetch handlers; a single `put` is atomic from the caller's view.
#[async_trait::async_trait]
pub trait ResponseStore: Send + Sync {
    /// Open a partition, creating it if absent
    async fn open(&self, partition: &str) -> Result<(), StoreError>;

    /// Store a response, replacing any previous response for the same key.
    /// Creates the partition if needed.
    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &ResponseDescriptor,
    ) -> Result<(), StoreError>;

    /// Store several responses in one transaction: all are written or none are
    async fn put_all(
        &self,
        partition: &str,
        entries: &[(RequestKey, ResponseDescriptor)],
    ) -> Result<(), StoreError>;

    /// Look up a stored response
    ///
    /// Returns `None` if the partition or the key is absent.
    async fn lookup(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<ResponseDescriptor>, StoreError>;

    /// Keys stored in a partition, sorted
    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError>;

    /// Names of every partition present
    async fn partitions(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a partition and everything in it
    ///
    /// Returns whether the partition existed.
    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError>;
}

/// Serialize headers as a JSON array of `[name, value]` pairs
pub(crate) fn encode_headers(headers: &HeaderMap) -> Result<String, StoreError> {
    let pairs: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(value) => Some((name.as_str(), value)),
            Err(_) => {
                warn!("Dropping non-text header {} from stored response", name);
                None
            }
        })
        .collect();

    serde_json::to_string(&pairs).map_err(|e| StoreError::Corrupt {
        key: "headers".to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn decode_headers(key: &str, json: &str) -> Result<HeaderMap, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let pairs: Vec<(String, String)> =
        serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))?;

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(e.to_string()))?;
        let value = HeaderValue::from_str(&value).map_err(|e| corrupt(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}
