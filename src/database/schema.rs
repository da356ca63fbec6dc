use crate::models::Table;
use rusqlite::{Connection, Result};

/// Initialize complete database schema for the record store and sync state
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Schema version table for future migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Check if schema already exists
    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_schema(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Create the complete schema (version 1)
fn create_schema(conn: &Connection) -> Result<()> {
    // One table per record category. The full record lives in `data`; the
    // other columns are projections used for lookups and manifest scans.
    for table in Table::all() {
        let name = table.as_str();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {name} (
                    id TEXT PRIMARY KEY,
                    updated_at INTEGER NOT NULL DEFAULT 0,
                    is_deleted INTEGER NOT NULL DEFAULT 0,
                    bucket TEXT,
                    unique_key TEXT UNIQUE,
                    data TEXT NOT NULL
                )"
            ),
            [],
        )?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{name}_updated_at ON {name}(updated_at)"),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_bucket ON {name}(bucket, updated_at)"
            ),
            [],
        )?;
    }

    // Table: sync_settings (WebDAV connection and engine tuning)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_url TEXT NOT NULL,
            username TEXT NOT NULL,
            app_password TEXT NOT NULL,
            remote_path TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            concurrency INTEGER NOT NULL DEFAULT 3,
            debounce_ms INTEGER NOT NULL DEFAULT 3000,
            poll_interval_secs INTEGER,
            device_id TEXT,
            last_sync TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Table: sync_baseline (manifest as of the last successful sync, single row)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_baseline (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            manifest TEXT NOT NULL,
            saved_at INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Creates update triggers for timestamp columns
pub fn create_update_triggers(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_sync_settings_timestamp
         AFTER UPDATE ON sync_settings
         BEGIN
            UPDATE sync_settings SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END",
        [],
    )?;

    Ok(())
}
