//! Download, merge and upload of single shards
//!
//! Shard shapes on the wire:
//! - single-table categories: a JSON array of records
//! - multi-table categories: `{"habits": [...], "habitLogs": [...]}`

use crate::database::RecordStore;
use crate::error::SyncError;
use crate::models::{Category, Record, Table};
use crate::services::manifest_service::RemoteDirs;
use crate::services::merge_service::{merge_records, MergeStats};
use crate::services::sync_paths::ShardPath;
use crate::services::sync_planner::ShardPlan;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use webdav_store::RemoteStore;

/// Decoded content of one shard, grouped by table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardPayload {
    pub tables: BTreeMap<Table, Vec<Record>>,
}

fn parse_records(table: Table, items: Vec<Value>) -> Vec<Record> {
    items
        .into_iter()
        .filter_map(|item| match Record::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unreadable {} record: {}", table.as_str(), e);
                None
            }
        })
        .collect()
}

impl ShardPayload {
    /// Decodes a shard. Missing or null table keys are empty, an array for a
    /// multi-table category belongs to its primary table.
    pub fn parse(category: Category, bytes: &[u8]) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let mut payload = ShardPayload::default();
        let primary = category.primary_table();

        match value {
            Value::Null => {}
            Value::Array(items) => {
                payload.tables.insert(primary, parse_records(primary, items));
            }
            Value::Object(mut map) => {
                for table in category.tables() {
                    match map.remove(table.json_key()) {
                        Some(Value::Array(items)) => {
                            payload.tables.insert(*table, parse_records(*table, items));
                        }
                        None | Some(Value::Null) => {}
                        Some(other) => log::warn!(
                            "Ignoring {} in {} shard: expected an array, got {}",
                            table.json_key(),
                            category.as_str(),
                            other
                        ),
                    }
                }
            }
            other => {
                return Err(SyncError::Validation(format!(
                    "{} shard is neither array nor object: {}",
                    category.as_str(),
                    other
                )))
            }
        }

        Ok(payload)
    }

    /// Encodes in the shape of `category`
    pub fn to_json(&self, category: Category) -> Result<Vec<u8>, SyncError> {
        let values = |table: &Table| -> Value {
            Value::Array(
                self.tables
                    .get(table)
                    .map(|records| records.iter().map(Record::to_value).collect())
                    .unwrap_or_default(),
            )
        };

        let value = if category.is_object_shaped() {
            let mut map = Map::new();
            for table in category.tables() {
                map.insert(table.json_key().to_string(), values(table));
            }
            Value::Object(map)
        } else {
            values(&category.primary_table())
        };

        Ok(serde_json::to_vec(&value)?)
    }

    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Highest `updatedAt` in the payload
    pub fn max_updated_at(&self) -> Option<i64> {
        self.tables
            .values()
            .flatten()
            .map(|record| record.updated_at)
            .max()
    }
}

/// Current local content of a shard, tombstones included
pub fn read_local_shard(store: &RecordStore, shard: &ShardPath) -> Result<ShardPayload, SyncError> {
    let mut payload = ShardPayload::default();
    for table in shard.category().tables() {
        let records = match shard.week() {
            Some(week) => store.scan_by_week(*table, week)?,
            None => store.scan_all(*table)?,
        };
        payload.tables.insert(*table, records);
    }
    Ok(payload)
}

/// Fetches a shard and merges all its tables in one transaction.
/// A shard missing on the remote merges nothing.
pub async fn download_shard<R: RemoteStore>(
    remote: &R,
    store: &RecordStore,
    root: &str,
    shard: &ShardPath,
) -> Result<MergeStats, SyncError> {
    let path = shard.to_remote_path(root);
    let Some(bytes) = remote.get(&path).await? else {
        log::info!("Shard {} not found on remote, nothing to merge", path);
        return Ok(MergeStats::default());
    };

    let payload = ShardPayload::parse(shard.category(), &bytes)?;
    let stats = store.run_in_transaction(|tx| {
        let mut stats = MergeStats::default();
        for (table, records) in &payload.tables {
            stats += merge_records(tx, *table, records);
        }
        Ok(stats)
    })?;

    log::debug!(
        "Merged {}: {} inserted, {} updated, {} skipped, {} failed",
        path,
        stats.inserted,
        stats.updated + stats.conflicts_resolved,
        stats.skipped,
        stats.failed
    );
    Ok(stats)
}

/// Uploads the local content of a shard. Returns the max `updatedAt` that
/// was written, or `None` when the shard is empty and nothing was sent.
pub async fn upload_shard<R: RemoteStore>(
    remote: &R,
    store: &RecordStore,
    dirs: &RemoteDirs,
    root: &str,
    shard: &ShardPath,
) -> Result<Option<i64>, SyncError> {
    let path = shard.to_remote_path(root);
    let payload = read_local_shard(store, shard)?;
    if payload.is_empty() {
        log::debug!("Shard {} is empty locally, skipping upload", path);
        return Ok(None);
    }

    let body = payload.to_json(shard.category())?;
    dirs.put_file(remote, &shard.remote_dir(root), &path, body)
        .await?;

    log::debug!("Uploaded {} ({} records)", path, payload.record_count());
    Ok(payload.max_updated_at())
}

/// Result of a settled shard task
#[derive(Debug, Clone, PartialEq)]
pub struct ShardOutcome {
    pub merged: MergeStats,
    /// Max `updatedAt` uploaded, if anything was uploaded
    pub uploaded: Option<i64>,
}

/// Executes one planned transfer; a `Both` plan downloads and merges
/// strictly before it uploads
pub async fn transfer_shard<R: RemoteStore>(
    remote: &R,
    store: &RecordStore,
    dirs: &RemoteDirs,
    root: &str,
    plan: &ShardPlan,
) -> Result<ShardOutcome, SyncError> {
    let mut outcome = ShardOutcome {
        merged: MergeStats::default(),
        uploaded: None,
    };

    if plan.action.downloads() {
        outcome.merged = download_shard(remote, store, root, &plan.shard).await?;
    }
    if plan.action.uploads() {
        outcome.uploaded = upload_shard(remote, store, dirs, root, &plan.shard).await?;
    }

    Ok(outcome)
}
