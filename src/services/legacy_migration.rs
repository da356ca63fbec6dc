//! Import of legacy weekly files (`data_<YYYY-Www>.json`)
//!
//! Older app versions wrote one file per week containing the whole week:
//! `{"tasks": [...], "logs": [...], "reviews": [...], "habits": [...], "habitLogs": [...]}`.
//! Records there carry auto-increment ids that are only unique per device,
//! so they get a deterministic id derived from `createdAt`.

use crate::database::RecordStore;
use crate::error::SyncError;
use crate::models::{Record, Table};
use crate::services::merge_service::{merge_records, MergeStats};
use crate::services::sync_paths::legacy_week_from_file_name;
use serde_json::{Map, Value};
use std::collections::HashMap;
use webdav_store::RemoteStore;

const LEGACY_TABLES: [Table; 5] = [
    Table::Tasks,
    Table::Logs,
    Table::Reviews,
    Table::Habits,
    Table::HabitLogs,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub files_found: usize,
    pub files_migrated: usize,
    pub files_failed: usize,
    pub merged: MergeStats,
}

/// Stable id of a legacy record
pub fn legacy_id(table: Table, created_at: i64) -> String {
    format!("legacy-{}-{}", table.as_str(), created_at)
}

fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Gives a legacy record a usable id. Returns the original id (for
/// remapping references) and the record, or `None` if it cannot be keyed.
fn normalize_legacy_record(table: Table, value: Value) -> Option<(Option<String>, Record)> {
    let Value::Object(mut map) = value else {
        log::warn!("Skipping non-object legacy {} entry", table.as_str());
        return None;
    };

    let original_id = map.get("id").and_then(id_key);
    let has_string_id = matches!(map.get("id"), Some(Value::String(s)) if !s.is_empty());

    if !has_string_id {
        let Some(created_at) = map.get("createdAt").and_then(Value::as_i64) else {
            log::warn!(
                "Skipping legacy {} entry without string id or createdAt",
                table.as_str()
            );
            return None;
        };
        map.insert("id".to_string(), Value::from(legacy_id(table, created_at)));
    }

    match Record::from_value(Value::Object(map)) {
        Ok(record) => Some((original_id, record)),
        Err(e) => {
            log::warn!("Skipping legacy {} entry: {}", table.as_str(), e);
            None
        }
    }
}

/// Decodes one legacy file into records per table
pub fn parse_legacy_file(bytes: &[u8]) -> Result<Vec<(Table, Vec<Record>)>, SyncError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut map) = value else {
        return Err(SyncError::Validation(
            "legacy file is not a JSON object".to_string(),
        ));
    };

    let mut habit_ids: HashMap<String, String> = HashMap::new();
    let mut tables = Vec::new();

    for table in LEGACY_TABLES {
        let items = match map.remove(table.json_key()) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let Some((original_id, mut record)) = normalize_legacy_record(table, item) else {
                continue;
            };
            match table {
                Table::Habits => {
                    if let Some(original_id) = original_id {
                        habit_ids.insert(original_id, record.id.clone());
                    }
                }
                Table::HabitLogs => remap_habit_id(&mut record.fields, &habit_ids),
                _ => {}
            }
            records.push(record);
        }
        tables.push((table, records));
    }

    Ok(tables)
}

fn remap_habit_id(fields: &mut Map<String, Value>, habit_ids: &HashMap<String, String>) {
    let mapped = fields
        .get("habitId")
        .and_then(id_key)
        .and_then(|old| habit_ids.get(&old).cloned());
    if let Some(new_id) = mapped {
        fields.insert("habitId".to_string(), Value::from(new_id));
    }
}

async fn migrate_file<R: RemoteStore>(
    remote: &R,
    store: &RecordStore,
    path: &str,
) -> Result<MergeStats, SyncError> {
    let bytes = remote
        .get(path)
        .await?
        .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
    let tables = parse_legacy_file(&bytes)?;

    store.run_in_transaction(|tx| {
        let mut stats = MergeStats::default();
        for (table, records) in &tables {
            stats += merge_records(tx, *table, records);
        }
        Ok(stats)
    })
}

/// Seeds the local store from all legacy weekly files under `root`.
///
/// A file that cannot be downloaded or parsed is logged and skipped;
/// rejected credentials abort the migration.
pub async fn migrate_legacy<R: RemoteStore>(
    remote: &R,
    store: &RecordStore,
    root: &str,
) -> Result<MigrationReport, SyncError> {
    let mut report = MigrationReport::default();

    let Some(entries) = remote.list(root).await? else {
        log::debug!("Remote root {} does not exist, nothing to migrate", root);
        return Ok(report);
    };

    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|entry| !entry.is_dir && legacy_week_from_file_name(&entry.name).is_some())
        .map(|entry| entry.name)
        .collect();
    files.sort();
    report.files_found = files.len();

    if files.is_empty() {
        return Ok(report);
    }
    log::info!("Migrating {} legacy files from {}", files.len(), root);

    for name in files {
        let path = format!("{}/{}", root, name);
        match migrate_file(remote, store, &path).await {
            Ok(stats) => {
                report.files_migrated += 1;
                report.merged += stats;
            }
            Err(SyncError::Remote(e)) if e.is_fatal() => return Err(SyncError::Remote(e)),
            Err(e) => {
                log::warn!("Skipping legacy file {}: {}", path, e);
                report.files_failed += 1;
            }
        }
    }

    log::info!(
        "Legacy migration finished: {} migrated, {} failed, {} records merged",
        report.files_migrated,
        report.files_failed,
        report.merged.applied()
    );
    Ok(report)
}
