use crate::error::SyncError;
use crate::models::{Manifest, SyncSettings};
use rusqlite::{Connection, OptionalExtension};

/// Loads the synchronization settings from the database
pub fn load_sync_settings(conn: &Connection) -> Result<Option<SyncSettings>, SyncError> {
    let mut stmt = conn.prepare(
        "SELECT id, server_url, username, app_password, remote_path, enabled, concurrency,
                debounce_ms, poll_interval_secs, device_id, last_sync, created_at, updated_at
         FROM sync_settings
         ORDER BY id DESC
         LIMIT 1",
    )?;

    let result = stmt.query_row([], |row| {
        let mut settings = SyncSettings::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?);
        settings.id = row.get(0)?;
        settings.enabled = row.get(5)?;
        settings.concurrency = row.get::<_, i64>(6)?.max(1) as usize;
        settings.debounce_ms = row.get::<_, i64>(7)?.max(0) as u64;
        settings.poll_interval_secs = row.get::<_, Option<i64>>(8)?.map(|s| s.max(0) as u64);
        settings.device_id = row.get(9)?;
        settings.last_sync = row.get(10)?;
        settings.created_at = row.get(11)?;
        settings.updated_at = row.get(12)?;
        Ok(settings)
    });

    match result {
        Ok(settings) => Ok(Some(settings)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(SyncError::Database(e)),
    }
}

/// Saves or updates the synchronization settings
pub fn save_sync_settings(conn: &Connection, settings: &SyncSettings) -> Result<i64, SyncError> {
    // Check if settings already exist
    let existing = load_sync_settings(conn)?;
    let poll_interval = settings.poll_interval_secs.map(|s| s as i64);

    if let Some(existing) = existing {
        // Update
        conn.execute(
            "UPDATE sync_settings
             SET server_url = ?1, username = ?2, app_password = ?3, remote_path = ?4, enabled = ?5,
                 concurrency = ?6, debounce_ms = ?7, poll_interval_secs = ?8, device_id = ?9
             WHERE id = ?10",
            (
                &settings.server_url,
                &settings.username,
                &settings.app_password,
                &settings.remote_path,
                settings.enabled,
                settings.concurrency as i64,
                settings.debounce_ms as i64,
                poll_interval,
                &settings.device_id,
                existing.id,
            ),
        )?;
        Ok(existing.id)
    } else {
        // Insert
        conn.execute(
            "INSERT INTO sync_settings (server_url, username, app_password, remote_path, enabled,
                                        concurrency, debounce_ms, poll_interval_secs, device_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            (
                &settings.server_url,
                &settings.username,
                &settings.app_password,
                &settings.remote_path,
                settings.enabled,
                settings.concurrency as i64,
                settings.debounce_ms as i64,
                poll_interval,
                &settings.device_id,
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }
}

/// Updates the timestamp of the last synchronization
pub fn update_last_sync(conn: &Connection) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE sync_settings SET last_sync = CURRENT_TIMESTAMP WHERE id = (SELECT MAX(id) FROM sync_settings)",
        [],
    )?;
    Ok(())
}

/// Enables or disables synchronization
pub fn set_sync_enabled(conn: &Connection, enabled: bool) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE sync_settings SET enabled = ?1 WHERE id = (SELECT MAX(id) FROM sync_settings)",
        [enabled],
    )?;
    Ok(())
}

/// Deletes all synchronization settings together with the baseline
pub fn delete_sync_settings(conn: &Connection) -> Result<(), SyncError> {
    conn.execute("DELETE FROM sync_settings", [])?;
    clear_baseline(conn)?;
    Ok(())
}

/// Manifest committed by the last successful sync; `None` before the first one
pub fn load_baseline(conn: &Connection) -> Result<Option<Manifest>, SyncError> {
    let json: Option<String> = conn
        .query_row("SELECT manifest FROM sync_baseline WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    match json {
        Some(json) => Ok(Some(Manifest::from_json(json.as_bytes())?)),
        None => Ok(None),
    }
}

pub fn save_baseline(conn: &Connection, baseline: &Manifest) -> Result<(), SyncError> {
    let json = serde_json::to_string(baseline)?;
    conn.execute(
        "INSERT INTO sync_baseline (id, manifest, saved_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET manifest = excluded.manifest, saved_at = excluded.saved_at",
        (json, chrono::Utc::now().timestamp_millis()),
    )?;
    Ok(())
}

/// Forgets the baseline; the next sync falls back to a two-way comparison
pub fn clear_baseline(conn: &Connection) -> Result<(), SyncError> {
    conn.execute("DELETE FROM sync_baseline", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        schema::create_update_triggers(&conn).unwrap();
        conn
    }

    fn settings() -> SyncSettings {
        SyncSettings::new(
            "https://cloud.example.com/remote.php/dav/files/alex".to_string(),
            "alex".to_string(),
            "app-password".to_string(),
            "life-habits-data".to_string(),
        )
    }

    #[test]
    fn test_save_and_load_settings() {
        let conn = setup();
        assert!(load_sync_settings(&conn).unwrap().is_none());

        let mut new_settings = settings();
        new_settings.concurrency = 5;
        new_settings.poll_interval_secs = Some(600);
        let id = save_sync_settings(&conn, &new_settings).unwrap();

        let loaded = load_sync_settings(&conn).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.server_url, new_settings.server_url);
        assert_eq!(loaded.concurrency, 5);
        assert_eq!(loaded.debounce_ms, 3000);
        assert_eq!(loaded.poll_interval_secs, Some(600));
        assert!(loaded.enabled);
        assert!(loaded.last_sync.is_none());
    }

    #[test]
    fn test_save_updates_existing_row() {
        let conn = setup();
        let first = save_sync_settings(&conn, &settings()).unwrap();

        let mut changed = settings();
        changed.username = "sam".to_string();
        let second = save_sync_settings(&conn, &changed).unwrap();

        assert_eq!(first, second);
        assert_eq!(load_sync_settings(&conn).unwrap().unwrap().username, "sam");
    }

    #[test]
    fn test_enable_and_last_sync() {
        let conn = setup();
        save_sync_settings(&conn, &settings()).unwrap();

        set_sync_enabled(&conn, false).unwrap();
        update_last_sync(&conn).unwrap();
        let loaded = load_sync_settings(&conn).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert!(loaded.last_sync.is_some());

        delete_sync_settings(&conn).unwrap();
        assert!(load_sync_settings(&conn).unwrap().is_none());
    }

    #[test]
    fn test_baseline_roundtrip_and_clear() {
        let conn = setup();
        assert_eq!(load_baseline(&conn).unwrap(), None);

        let mut baseline = Manifest::new();
        baseline.set("life-habits-data/todo/all.json", 500);
        save_baseline(&conn, &baseline).unwrap();
        baseline.set("life-habits-data/habits/all.json", 700);
        save_baseline(&conn, &baseline).unwrap();

        assert_eq!(load_baseline(&conn).unwrap(), Some(baseline));
        clear_baseline(&conn).unwrap();
        assert_eq!(load_baseline(&conn).unwrap(), None);
    }
}
