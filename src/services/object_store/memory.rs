//! In-process object store with ListObjectsV2-style paging.
//!
//! Backs the `memory` store backend for local development and every test that
//! needs a store. Keys are kept ordered so pages and continuation tokens
//! behave like S3.

use super::{ListPage, ListRequest, MAX_DELETE_BATCH, ObjectStore, ObjectSummary, StoreError, StoreResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Mutex, MutexGuard},
};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Put,
    Get,
    Head,
    List,
    Copy,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    failing: HashSet<StoreOperation>,
    delete_batches: Vec<usize>,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
    max_delete_batch: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A store whose listings return at most `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: page_size.max(1),
            max_delete_batch: MAX_DELETE_BATCH,
        }
    }

    pub fn with_max_delete_batch(mut self, max: usize) -> Self {
        self.max_delete_batch = max.max(1);
        self
    }

    /// Make every later call of `operation` fail with [`StoreError::Unavailable`].
    pub fn fail_on(&self, operation: StoreOperation) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: StoreOperation) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.remove(&operation);
        }
    }

    /// Keys currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .ok()?
            .objects
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// Sizes of the `delete_batch` calls seen so far.
    pub fn delete_batch_calls(&self) -> Vec<usize> {
        self.inner
            .lock()
            .map(|inner| inner.delete_batches.clone())
            .unwrap_or_default()
    }

    fn begin(&self, operation: StoreOperation) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        if inner.failing.contains(&operation) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for {operation:?}"
            )));
        }
        Ok(inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        let mut inner = self.begin(StoreOperation::Put)?;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let inner = self.begin(StoreOperation::Get)?;
        Ok(inner.objects.get(key).map(|o| o.body.clone()))
    }

    async fn head(&self, key: &str) -> StoreResult<bool> {
        let inner = self.begin(StoreOperation::Head)?;
        Ok(inner.objects.contains_key(key))
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage> {
        let inner = self.begin(StoreOperation::List)?;
        let start_after = request
            .continuation_token
            .as_deref()
            .map(decode_continuation_token)
            .transpose()?;

        let mut rows = inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(&request.prefix))
            .filter(|(key, _)| match &start_after {
                Some(after) => key.as_str() > after.as_str(),
                None => true,
            })
            .take(self.page_size + 1)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size_bytes: object.body.len() as u64,
            })
            .collect::<Vec<_>>();

        let mut continuation_token = None;
        if rows.len() > self.page_size {
            rows.truncate(self.page_size);
            continuation_token = rows.last().map(|last| encode_continuation_token(&last.key));
        }

        let mut objects = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if let Some(delimiter) = &request.delimiter {
                if let Some(prefix) = compute_common_prefix(&row.key, &request.prefix, delimiter) {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(row);
        }

        Ok(ListPage {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            continuation_token,
        })
    }

    async fn copy(&self, source: &str, destination: &str) -> StoreResult<()> {
        let mut inner = self.begin(StoreOperation::Copy)?;
        let object = inner
            .objects
            .get(source)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        inner.objects.insert(destination.to_string(), object);
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> StoreResult<()> {
        let mut inner = self.begin(StoreOperation::Delete)?;
        if keys.len() > self.max_delete_batch {
            return Err(StoreError::Unavailable(format!(
                "delete batch of {} exceeds limit {}",
                keys.len(),
                self.max_delete_batch
            )));
        }
        inner.delete_batches.push(keys.len());
        for key in keys {
            inner.objects.remove(key);
        }
        Ok(())
    }

    fn max_delete_batch(&self) -> usize {
        self.max_delete_batch
    }
}

/// Group a key under its first delimiter after `prefix`, S3 style.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!(
        "{}{}",
        prefix,
        &after_prefix[..pos + delimiter.len()]
    ))
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> StoreResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| StoreError::Parse(format!("invalid continuation token `{token}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(page_size: usize, keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::with_page_size(page_size);
        for key in keys {
            store.put(key, Bytes::from_static(b"abc"), "text/plain").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn pages_do_not_skip_or_repeat_keys() {
        let store = seeded(2, &["p/a", "p/b", "p/c", "p/d", "p/e"]).await;
        let mut seen = Vec::new();
        let mut request = ListRequest {
            prefix: "p/".into(),
            ..Default::default()
        };
        loop {
            let page = store.list_page(&request).await.unwrap();
            seen.extend(page.objects.into_iter().map(|o| o.key));
            match page.continuation_token {
                Some(token) => request.continuation_token = Some(token),
                None => break,
            }
        }
        assert_eq!(seen, vec!["p/a", "p/b", "p/c", "p/d", "p/e"]);
    }

    #[tokio::test]
    async fn delimiter_groups_common_prefixes() {
        let store = seeded(100, &["u/a.html", "u/b/c.css", "u/b/d.js", "u/e/f.txt"]).await;
        let page = store
            .list_page(&ListRequest {
                prefix: "u/".into(),
                delimiter: Some("/".into()),
                continuation_token: None,
            })
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "u/a.html");
        assert_eq!(page.common_prefixes, vec!["u/b/", "u/e/"]);
    }

    #[tokio::test]
    async fn missing_objects_are_not_errors() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        assert!(!store.head("nope").await.unwrap());
        assert!(matches!(
            store.copy("nope", "dest").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_apply_per_operation() {
        let store = seeded(10, &["k"]).await;
        store.fail_on(StoreOperation::Head);
        assert!(matches!(store.head("k").await, Err(StoreError::Unavailable(_))));
        assert!(store.get("k").await.unwrap().is_some());
        store.recover(StoreOperation::Head);
        assert!(store.head("k").await.unwrap());
    }

    #[tokio::test]
    async fn bogus_continuation_token_is_rejected() {
        let store = MemoryStore::new();
        let result = store
            .list_page(&ListRequest {
                prefix: String::new(),
                delimiter: None,
                continuation_token: Some("***".into()),
            })
            .await;
        assert!(matches!(result, Err(StoreError::Parse(_))));
    }
}
