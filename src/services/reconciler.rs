//! Recomputes the per-user storage size aggregate from the object store.

use crate::{
    models::user::UserRef,
    services::{
        object_store::{ObjectStore, StoreError, list_all},
        path_validator::{ValidationError, validate_login_name},
        user_repository::UserRepository,
    },
};
use anyhow::Context;
use chrono::Utc;
use futures::{StreamExt, future::join_all, stream};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid login name: {0}")]
    LoginName(#[from] ValidationError),
    #[error("listing the home directory failed: {0}")]
    Store(#[from] StoreError),
    #[error("storing the size failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Throughput knobs: users per batch, and batches in flight at once.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub batch_size: usize,
    pub concurrent_batches: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrent_batches: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub processed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    users: UserRepository,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, users: UserRepository, config: ReconcilerConfig) -> Self {
        Self {
            store,
            users,
            config,
        }
    }

    /// Sum every object under the user's home prefix and persist the total
    /// along with a history row.
    pub async fn recompute_home_directory_size(
        &self,
        user_id: i64,
        login_name: &str,
    ) -> Result<u64, ReconcileError> {
        validate_login_name(login_name)?;
        let objects = list_all(self.store.as_ref(), &format!("{}/", login_name)).await?;
        let total: u64 = objects.iter().map(|o| o.size_bytes).sum();

        let stored = i64::try_from(total).unwrap_or(i64::MAX);
        self.users
            .store_home_directory_size(user_id, stored, Utc::now())
            .await?;
        Ok(total)
    }

    /// Recompute every user. Users within a batch run concurrently, and up to
    /// `concurrent_batches` batches are in flight.
    pub async fn run_all(&self) -> anyhow::Result<ReconcileReport> {
        let started = Instant::now();
        let users = self
            .users
            .list_user_refs()
            .await
            .context("loading users to reconcile")?;
        info!(
            users = users.len(),
            batch_size = self.config.batch_size,
            concurrent_batches = self.config.concurrent_batches,
            "starting home directory size reconciliation"
        );

        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.concurrent_batches.max(1);
        let outcomes: Vec<Vec<bool>> = stream::iter(users.chunks(batch_size))
            .map(|batch| self.process_batch(batch))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let (processed, failed) = outcomes
            .iter()
            .flatten()
            .fold((0, 0), |(ok, bad), &success| {
                if success { (ok + 1, bad) } else { (ok, bad + 1) }
            });
        let report = ReconcileReport {
            processed,
            failed,
            elapsed: started.elapsed(),
        };
        info!(
            processed = report.processed,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "finished home directory size reconciliation"
        );
        Ok(report)
    }

    async fn process_batch(&self, batch: &[UserRef]) -> Vec<bool> {
        join_all(batch.iter().map(|user| async move {
            match self
                .recompute_home_directory_size(user.id, &user.login_name)
                .await
            {
                Ok(size) => {
                    info!(login = %user.login_name, size_bytes = size, "updated home directory size");
                    true
                }
                Err(err) => {
                    error!(login = %user.login_name, error = %err, "failed to update home directory size");
                    false
                }
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        object_store::{MemoryStore, memory::StoreOperation},
        user_repository::tests::test_repository,
    };
    use bytes::Bytes;

    async fn put(store: &MemoryStore, key: &str, size: usize) {
        store
            .put(key, Bytes::from(vec![0u8; size]), "application/octet-stream")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sums_every_page_of_the_home_prefix() {
        let repo = test_repository().await;
        let id = repo.insert_user("al", "hash").await.unwrap();
        let store = Arc::new(MemoryStore::with_page_size(2));
        put(&store, "al/index.html", 100).await;
        put(&store, "al/a/b.css", 20).await;
        put(&store, "al/a/c.js", 3).await;
        put(&store, "alice/other.html", 5000).await;

        let reconciler = Reconciler::new(store, repo.clone(), ReconcilerConfig::default());
        let size = reconciler
            .recompute_home_directory_size(id, "al")
            .await
            .unwrap();
        assert_eq!(size, 123);

        let user = repo.find_by_login_name("al").await.unwrap().unwrap();
        assert_eq!(user.home_directory_size_bytes, Some(123));
        assert!(user.home_directory_size_bytes_updated_at.is_some());
        assert_eq!(repo.size_history(id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_writes_nothing() {
        let repo = test_repository().await;
        let id = repo.insert_user("al", "hash").await.unwrap();
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOperation::List);

        let reconciler = Reconciler::new(store, repo.clone(), ReconcilerConfig::default());
        let err = reconciler
            .recompute_home_directory_size(id, "al")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Store(_)));
        assert!(repo.size_history(id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_all_processes_every_user_in_batches() {
        let repo = test_repository().await;
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for i in 0..7 {
            let login = format!("user{i}");
            ids.push(repo.insert_user(&login, "hash").await.unwrap());
            put(&store, &format!("{login}/index.html"), i + 1).await;
        }
        let bad = repo.insert_user("Bad Name", "hash").await.unwrap();

        let reconciler = Reconciler::new(
            store,
            repo.clone(),
            ReconcilerConfig {
                batch_size: 2,
                concurrent_batches: 2,
            },
        );
        let report = reconciler.run_all().await.unwrap();
        assert_eq!(report.processed, 7);
        assert_eq!(report.failed, 1);

        for (i, id) in ids.iter().enumerate() {
            let history = repo.size_history(*id, 1).await.unwrap();
            assert_eq!(history[0].size_bytes, i as i64 + 1);
        }
        assert!(repo.size_history(bad, 1).await.unwrap().is_empty());
    }
}
