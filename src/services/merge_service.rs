//! Record-level last-writer-wins merge of remote records into the local store

use crate::database::records::{delete_row, find_by_unique_key, get_record, upsert_record};
use crate::error::SyncError;
use crate::models::{Record, Table};
use rusqlite::Connection;
use std::ops::AddAssign;

/// Outcome counters of a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    /// Local copy was as new or newer
    pub skipped: usize,
    /// Unique-key collisions resolved by replacing the local row
    pub conflicts_resolved: usize,
    pub failed: usize,
}

impl MergeStats {
    /// Records that changed the local store
    pub fn applied(&self) -> usize {
        self.inserted + self.updated + self.conflicts_resolved
    }
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.conflicts_resolved += other.conflicts_resolved;
        self.failed += other.failed;
    }
}

enum Outcome {
    Inserted,
    Updated,
    Skipped,
    ConflictResolved,
}

/// Merges `records` into `table`
///
/// Per record: no local copy ⇒ insert; remote strictly newer ⇒ overwrite the
/// whole record; otherwise keep local. Merging the same input twice changes
/// nothing the second time. Failures of single records are logged and
/// counted, never returned.
pub fn merge_records(conn: &Connection, table: Table, records: &[Record]) -> MergeStats {
    let mut stats = MergeStats::default();

    for remote in records {
        match merge_one(conn, table, remote) {
            Ok(Outcome::Inserted) => stats.inserted += 1,
            Ok(Outcome::Updated) => stats.updated += 1,
            Ok(Outcome::Skipped) => stats.skipped += 1,
            Ok(Outcome::ConflictResolved) => stats.conflicts_resolved += 1,
            Err(e) => {
                log::warn!(
                    "Failed to merge record {} into {}: {}",
                    remote.id,
                    table.as_str(),
                    e
                );
                stats.failed += 1;
            }
        }
    }

    stats
}

fn merge_one(conn: &Connection, table: Table, remote: &Record) -> Result<Outcome, SyncError> {
    let outcome = match get_record(conn, table, &remote.id)? {
        None => Outcome::Inserted,
        Some(local) if remote.updated_at > local.updated_at => Outcome::Updated,
        Some(_) => return Ok(Outcome::Skipped),
    };

    match upsert_record(conn, table, remote) {
        Ok(()) => Ok(outcome),
        Err(e) if e.is_constraint_violation() => resolve_unique_conflict(conn, table, remote),
        Err(e) => Err(e),
    }
}

/// Another row holds the record's unique key (templates are unique by name).
/// The newer record wins and keeps the key; the remote id is adopted.
fn resolve_unique_conflict(
    conn: &Connection,
    table: Table,
    remote: &Record,
) -> Result<Outcome, SyncError> {
    let key = table
        .unique_field()
        .and_then(|field| remote.get_str(field))
        .ok_or_else(|| {
            SyncError::Validation(format!(
                "constraint violation for {} without unique key",
                remote.id
            ))
        })?;
    let holder = find_by_unique_key(conn, table, key)?
        .ok_or_else(|| SyncError::NotFound(format!("{} row holding '{}'", table.as_str(), key)))?;

    if remote.updated_at > holder.updated_at {
        log::info!(
            "Replacing {} {} by remote {} for '{}'",
            table.as_str(),
            holder.id,
            remote.id,
            key
        );
        delete_row(conn, table, &holder.id)?;
        upsert_record(conn, table, remote)?;
        Ok(Outcome::ConflictResolved)
    } else {
        log::debug!(
            "Keeping local {} {} for '{}', remote {} is older",
            table.as_str(),
            holder.id,
            key,
            remote.id
        );
        Ok(Outcome::Skipped)
    }
}
