//! Row-level helpers shared by the record store and the merge path.
//!
//! All functions take a plain `&Connection` so they can run inside a
//! transaction opened by [`super::RecordStore::run_in_transaction`].

use crate::error::SyncError;
use crate::models::{Record, Table};
use crate::services::sync_paths::record_week_label;
use rusqlite::{params, Connection, OptionalExtension};

fn decode(data: String) -> Result<Record, SyncError> {
    let value: serde_json::Value = serde_json::from_str(&data)?;
    Record::from_value(value).map_err(SyncError::Validation)
}

fn decode_all(rows: Vec<String>) -> Result<Vec<Record>, SyncError> {
    rows.into_iter().map(decode).collect()
}

/// Week bucket column; only date-scoped tables are bucketed
fn bucket_for(table: Table, record: &Record) -> Option<String> {
    if table.is_date_scoped() {
        record_week_label(record)
    } else {
        None
    }
}

/// Value of the legacy unique index; tombstones release their key
fn unique_key_for(table: Table, record: &Record) -> Option<String> {
    if record.is_deleted {
        return None;
    }
    table
        .unique_field()
        .and_then(|field| record.get_str(field))
        .map(str::to_string)
}

/// Loads a single record by id
pub fn get_record(conn: &Connection, table: Table, id: &str) -> Result<Option<Record>, SyncError> {
    let data: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE id = ?1", table.as_str()),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(decode).transpose()
}

/// Inserts or fully overwrites a record
pub fn upsert_record(conn: &Connection, table: Table, record: &Record) -> Result<(), SyncError> {
    let data = serde_json::to_string(record)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, updated_at, is_deleted, bucket, unique_key, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                is_deleted = excluded.is_deleted,
                bucket = excluded.bucket,
                unique_key = excluded.unique_key,
                data = excluded.data",
            table.as_str()
        ),
        params![
            record.id,
            record.updated_at,
            record.is_deleted,
            bucket_for(table, record),
            unique_key_for(table, record),
            data,
        ],
    )?;
    Ok(())
}

/// Finds the row currently holding a legacy unique key
pub fn find_by_unique_key(
    conn: &Connection,
    table: Table,
    key: &str,
) -> Result<Option<Record>, SyncError> {
    let data: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE unique_key = ?1", table.as_str()),
            [key],
            |row| row.get(0),
        )
        .optional()?;
    data.map(decode).transpose()
}

/// Physically removes a row
pub fn delete_row(conn: &Connection, table: Table, id: &str) -> Result<usize, SyncError> {
    let count = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table.as_str()),
        [id],
    )?;
    Ok(count)
}

/// All records of a table, tombstones included
pub fn scan_table(conn: &Connection, table: Table) -> Result<Vec<Record>, SyncError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT data FROM {} ORDER BY updated_at, id",
        table.as_str()
    ))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    decode_all(rows)
}

/// Records of one week bucket of a date-scoped table
pub fn scan_bucket(conn: &Connection, table: Table, week: &str) -> Result<Vec<Record>, SyncError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT data FROM {} WHERE bucket = ?1 ORDER BY updated_at, id",
        table.as_str()
    ))?;
    let rows = stmt
        .query_map([week], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    decode_all(rows)
}

/// Indexed `MAX(updated_at)`; `None` for an empty table
pub fn max_updated_at(conn: &Connection, table: Table) -> Result<Option<i64>, SyncError> {
    let max: Option<i64> = conn.query_row(
        &format!("SELECT MAX(updated_at) FROM {}", table.as_str()),
        [],
        |row| row.get(0),
    )?;
    Ok(max)
}

/// `MAX(updated_at)` per week bucket
pub fn max_updated_at_by_bucket(
    conn: &Connection,
    table: Table,
) -> Result<Vec<(String, i64)>, SyncError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT bucket, MAX(updated_at) FROM {} WHERE bucket IS NOT NULL GROUP BY bucket",
        table.as_str()
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Removes tombstones of a table
pub fn purge_deleted(conn: &Connection, table: Table) -> Result<usize, SyncError> {
    let count = conn.execute(
        &format!("DELETE FROM {} WHERE is_deleted = 1", table.as_str()),
        [],
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        conn
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = setup();
        let task = record(json!({"id": "t1", "updatedAt": 10, "title": "a"}));
        upsert_record(&conn, Table::Tasks, &task).unwrap();
        assert_eq!(get_record(&conn, Table::Tasks, "t1").unwrap(), Some(task));

        let newer = record(json!({"id": "t1", "updatedAt": 20, "title": "b"}));
        upsert_record(&conn, Table::Tasks, &newer).unwrap();
        assert_eq!(get_record(&conn, Table::Tasks, "t1").unwrap(), Some(newer));
        assert_eq!(get_record(&conn, Table::Tasks, "missing").unwrap(), None);
    }

    #[test]
    fn test_buckets_and_maxima() {
        let conn = setup();
        for (id, date, ts) in [
            ("l1", "2025-12-25", 100),
            ("l2", "2025-12-22", 300),
            ("l3", "2025-12-15", 200),
        ] {
            let log = record(json!({"id": id, "updatedAt": ts, "date": date}));
            upsert_record(&conn, Table::Logs, &log).unwrap();
        }

        let mut by_week = max_updated_at_by_bucket(&conn, Table::Logs).unwrap();
        by_week.sort();
        assert_eq!(
            by_week,
            vec![("2025-W51".to_string(), 200), ("2025-W52".to_string(), 300)]
        );
        assert_eq!(scan_bucket(&conn, Table::Logs, "2025-W52").unwrap().len(), 2);
        assert_eq!(max_updated_at(&conn, Table::Logs).unwrap(), Some(300));
        assert_eq!(max_updated_at(&conn, Table::Tasks).unwrap(), None);
    }

    #[test]
    fn test_unique_key_conflict_and_lookup() {
        let conn = setup();
        let a = record(json!({"id": "a", "updatedAt": 1, "name": "Weekly"}));
        let b = record(json!({"id": "b", "updatedAt": 2, "name": "Weekly"}));
        upsert_record(&conn, Table::Templates, &a).unwrap();

        let err = upsert_record(&conn, Table::Templates, &b).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(
            find_by_unique_key(&conn, Table::Templates, "Weekly")
                .unwrap()
                .map(|r| r.id),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_tombstones_release_unique_key_and_purge() {
        let conn = setup();
        let mut a = record(json!({"id": "a", "updatedAt": 1, "name": "Weekly"}));
        upsert_record(&conn, Table::Templates, &a).unwrap();
        a.mark_deleted();
        upsert_record(&conn, Table::Templates, &a).unwrap();

        let b = record(json!({"id": "b", "updatedAt": 2, "name": "Weekly"}));
        upsert_record(&conn, Table::Templates, &b).unwrap();

        assert_eq!(scan_table(&conn, Table::Templates).unwrap().len(), 2);
        assert_eq!(purge_deleted(&conn, Table::Templates).unwrap(), 1);
        assert_eq!(delete_row(&conn, Table::Templates, "b").unwrap(), 1);
        assert!(scan_table(&conn, Table::Templates).unwrap().is_empty());
    }
}
