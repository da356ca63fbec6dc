use crate::database::RecordStore;
use crate::error::SyncError;
use crate::models::{Category, Manifest};
use crate::services::sync_paths::{manifest_path, now_millis, ShardPath};
use std::collections::HashSet;
use std::sync::Mutex;
use webdav_store::{RemoteError, RemoteStore};

/// Cache of remote collections known to exist
///
/// Every upload goes through [`RemoteDirs::ensure_dir`], which walks the path
/// prefix by prefix and creates missing collections with `MKCOL`.
#[derive(Default)]
pub struct RemoteDirs {
    known: Mutex<HashSet<String>>,
}

impl RemoteDirs {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_known(&self, path: &str) -> bool {
        self.known
            .lock()
            .map(|known| known.contains(path))
            .unwrap_or(false)
    }

    fn remember(&self, path: &str) {
        if let Ok(mut known) = self.known.lock() {
            known.insert(path.to_string());
        }
    }

    /// Forget cached directories, e.g. after the remote was reset
    pub fn clear(&self) {
        if let Ok(mut known) = self.known.lock() {
            known.clear();
        }
    }

    /// Makes sure the collection `path` and all its parents exist
    pub async fn ensure_dir<R: RemoteStore>(&self, remote: &R, path: &str) -> Result<(), SyncError> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            if self.is_known(&current) {
                continue;
            }
            if !remote.exists(&current).await? {
                log::debug!("Creating remote directory: {}", current);
                remote.mkcol(&current).await?;
            }
            self.remember(&current);
        }
        Ok(())
    }

    /// Uploads `body` to `path` inside the collection `dir`.
    ///
    /// A 409 means a collection vanished behind the cache (remote folder
    /// deleted or reset): the cache is dropped, the collections are created
    /// again and the upload is retried once.
    pub async fn put_file<R: RemoteStore>(
        &self,
        remote: &R,
        dir: &str,
        path: &str,
        body: Vec<u8>,
    ) -> Result<(), SyncError> {
        self.ensure_dir(remote, dir).await?;
        match remote.put(path, body.clone()).await {
            Err(RemoteError::Http { status: 409, .. }) => {
                log::info!("Parent of {} is missing, recreating remote directories", path);
                self.clear();
                self.ensure_dir(remote, dir).await?;
                remote.put(path, body).await?;
                Ok(())
            }
            result => Ok(result?),
        }
    }
}

/// Describes the local store as a manifest: one entry per non-empty shard
/// holding the max `updatedAt` of its records, tombstones included
pub fn build_local_manifest(store: &RecordStore, root: &str) -> Result<Manifest, SyncError> {
    let mut manifest = Manifest::new();

    for category in Category::all() {
        if category.is_date_scoped() {
            for table in category.tables() {
                for (week, max) in store.max_updated_at_by_week(*table)? {
                    let Some(shard) = ShardPath::weekly(*category, &week) else {
                        log::warn!("Ignoring invalid week bucket {} in {}", week, table.as_str());
                        continue;
                    };
                    let path = shard.to_remote_path(root);
                    let current = manifest.updated_at(&path).unwrap_or(i64::MIN);
                    manifest.set(path, current.max(max));
                }
            }
        } else {
            let mut category_max: Option<i64> = None;
            for table in category.tables() {
                if let Some(max) = store.max_updated_at(*table)? {
                    category_max = Some(category_max.map_or(max, |m| m.max(max)));
                }
            }
            if let (Some(max), Some(shard)) = (category_max, ShardPath::aggregate(*category)) {
                manifest.set(shard.to_remote_path(root), max);
            }
        }
    }

    manifest.last_updated = now_millis();
    Ok(manifest)
}

/// Downloads the remote manifest; `None` when the remote has none yet
pub async fn fetch_remote_manifest<R: RemoteStore>(
    remote: &R,
    root: &str,
) -> Result<Option<Manifest>, SyncError> {
    let path = manifest_path(root);
    match remote.get(&path).await? {
        Some(bytes) => {
            let manifest = Manifest::from_json(&bytes)?;
            log::debug!(
                "Remote manifest v{} with {} entries",
                manifest.version,
                manifest.files.len()
            );
            Ok(Some(manifest))
        }
        None => {
            log::info!("No remote manifest at {}", path);
            Ok(None)
        }
    }
}

/// Writes the manifest; called only after all shard transfers settled
pub async fn commit_manifest<R: RemoteStore>(
    remote: &R,
    dirs: &RemoteDirs,
    root: &str,
    manifest: &Manifest,
) -> Result<(), SyncError> {
    dirs.put_file(remote, root, &manifest_path(root), manifest.to_json()?)
        .await?;
    log::debug!("Committed manifest with {} entries", manifest.files.len());
    Ok(())
}
