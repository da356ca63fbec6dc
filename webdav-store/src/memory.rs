//! In-memory implementation of [`RemoteStore`]
//!
//! Mirrors the WebDAV rules the sync engine relies on: `PUT` and `MKCOL`
//! answer 409 when the parent collection is missing, `GET` on a missing file
//! is a 404. Paths can be marked as failing, and an optional per-request
//! latency makes overlapping requests observable.

use crate::models::RemoteEntry;
use crate::{RemoteError, RemoteResult, RemoteStore};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    failing: HashSet<String>,
    unauthorized: bool,
    requests: Vec<String>,
}

/// Remote store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Tracks in-flight requests for the concurrency high-water mark
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps for `latency` before it is answered
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned test double is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds a file, creating all parent collections
    pub fn insert_file(&self, path: &str, body: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = self.lock();
        let mut parent = parent_of(&path);
        while !parent.is_empty() {
            state.dirs.insert(parent.clone());
            parent = parent_of(&parent);
        }
        state.files.insert(path, body.into());
    }

    /// Current content of a file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    /// All file paths, sorted
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.lock().dirs.contains(&path)
    }

    /// Drops every file and collection, as if the remote folder was wiped
    /// on the server. Failure injection and the request log are kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.files.clear();
        state.dirs.clear();
    }

    /// `GET` and `PUT` on `path` fail with 503 until [`MemoryStore::heal_path`]
    pub fn fail_path(&self, path: &str) {
        self.lock().failing.insert(normalize(path));
    }

    pub fn heal_path(&self, path: &str) {
        self.lock().failing.remove(&normalize(path));
    }

    /// Every request answers 401 while set
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    /// Highest number of requests that were in flight at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Requests in arrival order, formatted as `METHOD path`
    pub fn request_log(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    async fn begin(&self, method: &str, path: &str) -> RemoteResult<InFlight<'_>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.active);

        {
            let mut state = self.lock();
            state.requests.push(format!("{} {}", method, path));
            if state.unauthorized {
                return Err(RemoteError::Unauthorized(path.to_string()));
            }
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        Ok(guard)
    }

    fn check_failing(&self, path: &str) -> RemoteResult<()> {
        if self.lock().failing.contains(path) {
            return Err(RemoteError::Http {
                status: 503,
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        let path = normalize(path);
        let _guard = self.begin("PROPFIND", &path).await?;
        let state = self.lock();
        Ok(path.is_empty() || state.dirs.contains(&path) || state.files.contains_key(&path))
    }

    async fn list(&self, path: &str) -> RemoteResult<Option<Vec<RemoteEntry>>> {
        let path = normalize(path);
        let _guard = self.begin("PROPFIND", &path).await?;
        let state = self.lock();

        if !path.is_empty() && !state.dirs.contains(&path) {
            return Ok(None);
        }

        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|dir| parent_of(dir) == path)
            .map(|dir| RemoteEntry {
                name: crate::file_name(dir).to_string(),
                is_dir: true,
            })
            .chain(
                state
                    .files
                    .keys()
                    .filter(|file| parent_of(file) == path)
                    .map(|file| RemoteEntry {
                        name: crate::file_name(file).to_string(),
                        is_dir: false,
                    }),
            )
            .collect();
        entries.sort();

        Ok(Some(entries))
    }

    async fn mkcol(&self, path: &str) -> RemoteResult<()> {
        let path = normalize(path);
        let _guard = self.begin("MKCOL", &path).await?;
        let mut state = self.lock();

        let parent = parent_of(&path);
        if !parent.is_empty() && !state.dirs.contains(&parent) {
            return Err(RemoteError::Http { status: 409, path });
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn get(&self, path: &str) -> RemoteResult<Option<Vec<u8>>> {
        let path = normalize(path);
        let _guard = self.begin("GET", &path).await?;
        self.check_failing(&path)?;
        Ok(self.lock().files.get(&path).cloned())
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> RemoteResult<()> {
        let path = normalize(path);
        let _guard = self.begin("PUT", &path).await?;
        self.check_failing(&path)?;
        let mut state = self.lock();

        let parent = parent_of(&path);
        if !parent.is_empty() && !state.dirs.contains(&parent) {
            return Err(RemoteError::Http { status: 409, path });
        }
        state.files.insert(path, body);
        Ok(())
    }
}
