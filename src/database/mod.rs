pub mod records;
pub mod schema;

use crate::error::SyncError;
use crate::models::{Record, Table};
use crate::services::sync_paths::record_week_label;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Notification about a local mutation made through [`RecordStore::put`] or
/// [`RecordStore::delete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub id: String,
}

/// Local record store on top of SQLite
///
/// The connection sits behind a mutex, so every operation and every
/// transaction is serialized. Merges write through the helpers in
/// [`records`] inside [`RecordStore::run_in_transaction`] and do not emit
/// change events.
pub struct RecordStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

impl RecordStore {
    /// Opens (and initializes) the database file, creating its directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened record store at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        schema::init_schema(&conn)?;
        schema::create_update_triggers(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Other("record store lock poisoned".to_string()))
    }

    fn publish(&self, event: ChangeEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Receives a [`ChangeEvent`] for every local put and delete from now on
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn get(&self, table: Table, id: &str) -> Result<Option<Record>, SyncError> {
        let conn = self.lock()?;
        records::get_record(&conn, table, id)
    }

    /// Stores a locally mutated record. Callers stamp it with
    /// [`Record::touch`] (or create it with [`Record::new`]) first.
    pub fn put(&self, table: Table, record: &Record) -> Result<(), SyncError> {
        {
            let conn = self.lock()?;
            if table.is_date_scoped() && record_week_label(record).is_none() {
                log::warn!(
                    "Record {} in {} has neither date nor createdAt and will not be synced",
                    record.id,
                    table.as_str()
                );
            }
            records::upsert_record(&conn, table, record)?;
        }
        self.publish(ChangeEvent {
            table,
            id: record.id.clone(),
        });
        Ok(())
    }

    /// Tombstones a record. Returns `false` if it does not exist.
    pub fn delete(&self, table: Table, id: &str) -> Result<bool, SyncError> {
        {
            let conn = self.lock()?;
            let Some(mut record) = records::get_record(&conn, table, id)? else {
                return Ok(false);
            };
            record.mark_deleted();
            records::upsert_record(&conn, table, &record)?;
        }
        self.publish(ChangeEvent {
            table,
            id: id.to_string(),
        });
        Ok(true)
    }

    pub fn scan_all(&self, table: Table) -> Result<Vec<Record>, SyncError> {
        let conn = self.lock()?;
        records::scan_table(&conn, table)
    }

    pub fn scan_by_week(&self, table: Table, week: &str) -> Result<Vec<Record>, SyncError> {
        let conn = self.lock()?;
        records::scan_bucket(&conn, table, week)
    }

    pub fn max_updated_at(&self, table: Table) -> Result<Option<i64>, SyncError> {
        let conn = self.lock()?;
        records::max_updated_at(&conn, table)
    }

    pub fn max_updated_at_by_week(&self, table: Table) -> Result<Vec<(String, i64)>, SyncError> {
        let conn = self.lock()?;
        records::max_updated_at_by_bucket(&conn, table)
    }

    /// Runs `f` in a single SQLite transaction; any error rolls back
    pub fn run_in_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Plain access for settings and baseline persistence
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Removes all tombstones; returns the number of purged rows
    pub fn purge_deleted(&self) -> Result<usize, SyncError> {
        self.run_in_transaction(|tx| {
            let mut purged = 0;
            for table in Table::all() {
                purged += records::purge_deleted(tx, *table)?;
            }
            log::info!("Purged {} deleted records", purged);
            Ok(purged)
        })
    }
}
