//! Contract over a flat key/value blob store with S3 semantics.
//!
//! Keys use `/` as a separator by convention only. Two outcomes are *not*
//! errors: `get` of a missing key yields `None` and `head` yields `false`.
//! Everything else that goes wrong is a [`StoreError`].

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

/// Upper bound of keys per `delete_batch` call imposed by S3.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("{operation} failed with HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to delete {failed} of {requested} objects")]
    PartialDelete { requested: usize, failed: usize },
    #[error("malformed store response: {0}")]
    Parse(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
}

/// One page of a prefix listing. A `continuation_token` means more pages follow.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()>;

    /// Fetch an object body. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Existence check without transferring the body.
    async fn head(&self, key: &str) -> StoreResult<bool>;

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage>;

    /// Server-side copy. Fails with [`StoreError::NotFound`] when `source` is missing.
    async fn copy(&self, source: &str, destination: &str) -> StoreResult<()>;

    /// Delete up to [`ObjectStore::max_delete_batch`] keys. Missing keys are ignored.
    async fn delete_batch(&self, keys: &[String]) -> StoreResult<()>;

    fn max_delete_batch(&self) -> usize {
        MAX_DELETE_BATCH
    }
}

/// Drain every page of a prefix listing.
pub async fn list_all(store: &dyn ObjectStore, prefix: &str) -> StoreResult<Vec<ObjectSummary>> {
    let mut request = ListRequest {
        prefix: prefix.to_string(),
        ..Default::default()
    };
    let mut objects = Vec::new();
    loop {
        let page = store.list_page(&request).await?;
        objects.extend(page.objects);
        match page.continuation_token {
            Some(token) => request.continuation_token = Some(token),
            None => break,
        }
    }
    Ok(objects)
}

/// Delete `keys` in chunks that respect the store's batch limit.
/// Returns the number of keys submitted.
pub async fn delete_keys(store: &dyn ObjectStore, keys: &[String]) -> StoreResult<usize> {
    let batch = store.max_delete_batch().max(1);
    for chunk in keys.chunks(batch) {
        store.delete_batch(chunk).await?;
    }
    Ok(keys.len())
}
