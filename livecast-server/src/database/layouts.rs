//! Service layout database operations.

use chrono::Utc;
use log::trace;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::{Database, Result};
use crate::layout::{LayoutStore, ServiceKey, ServiceLayout, StoreResult};

/// A stored layout row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRecord {
    pub service_key: ServiceKey,
    pub layout_json: String,
    pub updated_at: i64,
}

impl Database {
    /// Get the stored layout of a service.
    pub fn get_layout(&self, key: ServiceKey) -> Result<Option<LayoutRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT service_key, layout_json, updated_at FROM service_layouts WHERE service_key = ?1",
                params![key.0 as i64],
                |row| {
                    Ok(LayoutRecord {
                        service_key: ServiceKey(row.get::<_, i64>(0)? as u32),
                        layout_json: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace the layout of a service.
    pub fn upsert_layout(&self, key: ServiceKey, layout_json: &str, updated_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO service_layouts (service_key, layout_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(service_key) DO UPDATE SET layout_json = excluded.layout_json, updated_at = excluded.updated_at",
            params![key.0 as i64, layout_json, updated_at],
        )?;
        Ok(())
    }

    /// Delete the layout of a service. Returns true if a row was removed.
    #[cfg(test)]
    pub fn delete_layout(&self, key: ServiceKey) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM service_layouts WHERE service_key = ?1",
            params![key.0 as i64],
        )?;
        Ok(changed > 0)
    }

    /// Number of stored layouts.
    #[cfg(test)]
    pub fn count_layouts(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM service_layouts", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// [`LayoutStore`] backed by the SQLite database.
pub struct SqliteLayoutStore {
    db: Mutex<Database>,
}

impl SqliteLayoutStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl LayoutStore for SqliteLayoutStore {
    fn get(&self, key: &ServiceKey) -> StoreResult<Option<ServiceLayout>> {
        let record = self.db.lock().get_layout(*key)?;
        match record {
            Some(record) => {
                trace!("Layout {:?} stored at {}", record.service_key, record.updated_at);
                Ok(Some(serde_json::from_str(&record.layout_json)?))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &ServiceKey, layout: &ServiceLayout) -> StoreResult<()> {
        let json = serde_json::to_string(layout)?;
        self.db
            .lock()
            .upsert_layout(*key, &json, Utc::now().timestamp())?;
        Ok(())
    }
}
