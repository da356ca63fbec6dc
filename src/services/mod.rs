pub mod background_sync;
pub mod legacy_migration;
pub mod manifest_service;
pub mod merge_service;
pub mod scheduler;
pub mod shard_transfer;
pub mod sync_engine;
pub mod sync_paths;
pub mod sync_planner;
pub mod sync_service;

pub use background_sync::{AutoSync, SyncLogEntry, SyncObserver, SyncStatus};
pub use sync_engine::{SyncEngine, SyncReport};
pub use sync_service::*;
