//! Differential synchronization of a local SQLite record store against a
//! WebDAV folder of JSON shards.

pub mod database;
pub mod error;
pub mod models;
pub mod services;

pub use database::{ChangeEvent, RecordStore};
pub use error::SyncError;
pub use models::{Category, Manifest, Record, SyncSettings, Table};
pub use services::{AutoSync, SyncEngine, SyncReport, SyncStatus};
