//! Packs a user's whole home directory into a gzip'd tarball.

use crate::services::object_store::{ObjectStore, StoreError, list_all};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use futures::{StreamExt, stream};
use std::io;
use thiserror::Error;
use tracing::{info, warn};

/// Object fetches in flight while collecting archive entries.
pub const FETCH_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("writing the archive failed: {0}")]
    Io(#[from] io::Error),
    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct HomeArchive {
    pub file_name: String,
    pub entries: usize,
    pub body: Vec<u8>,
}

/// Download every object under `{login_name}/` and pack it.
///
/// Returns `Ok(None)` when the home directory holds nothing. Objects that fail
/// to download are logged and left out.
pub async fn archive_home(
    store: &dyn ObjectStore,
    login_name: &str,
) -> Result<Option<HomeArchive>, ArchiveError> {
    let home = format!("{}/", login_name);
    let objects = list_all(store, &home).await?;

    let paths: Vec<(String, String)> = objects
        .into_iter()
        .filter_map(|o| {
            let relative = o.key.strip_prefix(&home)?.to_string();
            (!relative.is_empty() && !relative.ends_with('/')).then_some((o.key, relative))
        })
        .collect();
    if paths.is_empty() {
        return Ok(None);
    }

    let fetched: Vec<(String, Bytes)> = stream::iter(paths)
        .map(|(key, relative)| async move {
            match store.get(&key).await {
                Ok(Some(body)) => Some((relative, body)),
                Ok(None) => {
                    warn!(key = %key, "object vanished while archiving");
                    None
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping object that failed to download");
                    None
                }
            }
        })
        .buffered(FETCH_CONCURRENCY)
        .filter_map(|entry| async move { entry })
        .collect()
        .await;

    let entries = fetched.len();
    let body = tokio::task::spawn_blocking(move || pack(&fetched)).await??;
    info!(login = login_name, entries, bytes = body.len(), "built home archive");

    Ok(Some(HomeArchive {
        file_name: format!("{}-directory.tar.gz", login_name),
        entries,
        body,
    }))
}

fn pack(entries: &[(String, Bytes)]) -> io::Result<Vec<u8>> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::new(6)));
    for (path, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        tar.append_data(&mut header, path, body.as_ref())?;
    }
    tar.into_inner()?.finish()
}
