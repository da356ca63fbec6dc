//! # WebDAV Store
//!
//! A path-addressed blob store reachable only through the four WebDAV
//! primitives `PROPFIND`, `MKCOL`, `GET` and `PUT`.
//!
//! The [`RemoteStore`] trait is the seam the sync engine is written against:
//! - [`WebDavStore`] talks to a real server (Nextcloud, ownCloud, Apache mod_dav, ...)
//! - [`MemoryStore`] keeps everything in memory and is used by tests
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use webdav_store::{RemoteStore, WebDavConfig, WebDavStore};
//!
//! let store = WebDavStore::new(WebDavConfig {
//!     base_url: "https://cloud.example.com/remote.php/dav/files/alice".to_string(),
//!     username: "alice".to_string(),
//!     password: "app-password".to_string(),
//! })?;
//!
//! if let Some(bytes) = store.get("life-habits-data/sync-manifest.json").await? {
//!     // ...
//! }
//! ```

pub mod client;
pub mod memory;
pub mod models;

use std::future::Future;

pub use client::WebDavStore;
pub use memory::MemoryStore;
pub use models::{RemoteEntry, WebDavConfig};

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while talking to the remote store
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Credentials were rejected (401/403)
    Unauthorized(String),
    /// The server answered with an unexpected status code
    Http { status: u16, path: String },
    /// Connection, TLS or protocol level failure
    Transport(String),
}

impl RemoteError {
    /// Errors after which retrying another path is pointless
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Unauthorized(_))
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Unauthorized(path) => write!(f, "Unauthorized access to {}", path),
            RemoteError::Http { status, path } => {
                write!(f, "Unexpected HTTP status {} for {}", status, path)
            }
            RemoteError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Hierarchical blob store addressed by slash-separated relative paths.
///
/// All futures are `Send` so callers may drive them from spawned tasks.
pub trait RemoteStore: Send + Sync + 'static {
    /// `PROPFIND` with depth 0: does a file or collection exist at `path`?
    fn exists(&self, path: &str) -> impl Future<Output = RemoteResult<bool>> + Send;

    /// `PROPFIND` with depth 1: direct children of the collection at `path`,
    /// or `None` when the collection does not exist.
    fn list(&self, path: &str)
        -> impl Future<Output = RemoteResult<Option<Vec<RemoteEntry>>>> + Send;

    /// `MKCOL`: create a collection. The parent must exist. Creating an
    /// existing collection succeeds.
    fn mkcol(&self, path: &str) -> impl Future<Output = RemoteResult<()>> + Send;

    /// `GET`: file content, or `None` on 404.
    fn get(&self, path: &str) -> impl Future<Output = RemoteResult<Option<Vec<u8>>>> + Send;

    /// `PUT`: create or replace a file. The parent collection must exist.
    fn put(&self, path: &str, body: Vec<u8>) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Last path segment of an href or path, ignoring a trailing slash
pub fn file_name(href: &str) -> &str {
    href.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/dav/files/u/data/data_2024-W10.json"), "data_2024-W10.json");
        assert_eq!(file_name("/dav/files/u/data/todo/"), "todo");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(file_name(""), "");
    }

    #[test]
    fn test_only_unauthorized_is_fatal() {
        assert!(RemoteError::Unauthorized("x".to_string()).is_fatal());
        assert!(!RemoteError::Transport("reset".to_string()).is_fatal());
        assert!(!RemoteError::Http {
            status: 500,
            path: "x".to_string()
        }
        .is_fatal());
    }
}
