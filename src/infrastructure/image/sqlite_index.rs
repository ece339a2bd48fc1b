//! SQLite implementation of the disk cache index.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::{CacheIndexStore, IndexRecord};

/// Index database file name inside the cache directory.
pub const INDEX_FILE_NAME: &str = "index.db";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            hash    INTEGER NOT NULL,
            name    TEXT NOT NULL,
            size    INTEGER NOT NULL DEFAULT 0,
            used    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cache_hash ON cache(hash);
        CREATE INDEX IF NOT EXISTS idx_cache_used ON cache(used);
        CREATE TABLE IF NOT EXISTS meta (
            id      INTEGER PRIMARY KEY,
            value   INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Init(e.to_string()))
}

fn to_db_size(byte_size: u64) -> i64 {
    i64::try_from(byte_size).unwrap_or(i64::MAX)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRecord> {
    let size: i64 = row.get(3)?;
    Ok(IndexRecord {
        id: row.get(0)?,
        origin_hash: row.get(1)?,
        origin_key: row.get(2)?,
        byte_size: u64::try_from(size).unwrap_or(0),
        last_used: row.get(4)?,
    })
}

/// Disk cache index stored in SQLite.
pub struct SqliteCacheIndex {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteCacheIndex {
    /// Opens (or creates) the index database at `path`.
    ///
    /// A database that cannot be opened or migrated is deleted and recreated.
    ///
    /// # Errors
    /// Returns an error if even a fresh database cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let opened = Connection::open(path)
            .map_err(StoreError::from)
            .and_then(|conn| init_schema(&conn).map(|()| conn));

        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cache index unusable, recreating");
                remove_database_files(path);
                let conn = Connection::open(path)?;
                init_schema(&conn)?;
                conn
            }
        };

        debug!(path = %path.display(), "Opened cache index");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an index that lives only in memory.
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn, path: None })
    }
}

fn remove_database_files(path: &Path) {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        if let Err(e) = std::fs::remove_file(&name)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = ?name, error = %e, "Failed to remove cache index file");
        }
    }
}

impl CacheIndexStore for SqliteCacheIndex {
    fn find(&self, origin_hash: i64, origin_key: &str) -> StoreResult<Option<IndexRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, hash, name, size, used FROM cache WHERE hash = ?1 AND name = ?2",
                params![origin_hash, origin_key],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert(
        &self,
        origin_hash: i64,
        origin_key: &str,
        byte_size: u64,
        last_used: i64,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO cache (hash, name, size, used) VALUES (?1, ?2, ?3, ?4)",
            params![origin_hash, origin_key, to_db_size(byte_size), last_used],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn touch(&self, id: i64, last_used: i64) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE cache SET used = ?1 WHERE id = ?2",
            params![last_used, id],
        )?;
        Ok(())
    }

    fn update_size(&self, id: i64, byte_size: u64, last_used: i64) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE cache SET size = ?1, used = ?2 WHERE id = ?3",
            params![to_db_size(byte_size), last_used, id],
        )?;
        Ok(())
    }

    fn least_recently_used(&self) -> StoreResult<Option<IndexRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, hash, name, size, used FROM cache ORDER BY used ASC, id ASC LIMIT 1",
                [],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM cache WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn read_meta(&self, key: i64) -> StoreResult<Option<i64>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_meta(&self, key: i64, value: i64) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (id, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn reset(&mut self) -> StoreResult<()> {
        let fresh = match &self.path {
            Some(path) => {
                // Release the file before deleting it.
                let old = std::mem::replace(&mut self.conn, Connection::open_in_memory()?);
                drop(old);
                remove_database_files(path);
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        init_schema(&fresh)?;
        self.conn = fresh;
        info!("Cache index recreated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let id = index.insert(7, "https://example.com/a.png", 120, 1000).unwrap();

        let record = index.find(7, "https://example.com/a.png").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.byte_size, 120);
        assert_eq!(record.last_used, 1000);
        assert!(record.has_bytes());
        assert!(id > 0);
    }

    #[test]
    fn test_hash_collision_falls_through_to_key() {
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        index.insert(7, "https://example.com/a.png", 120, 1000).unwrap();

        assert!(index.find(7, "https://example.com/b.png").unwrap().is_none());
        assert!(index.find(8, "https://example.com/a.png").unwrap().is_none());
    }

    #[test]
    fn test_least_recently_used_orders_by_timestamp() {
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let a = index.insert(1, "a", 10, 300).unwrap();
        let b = index.insert(2, "b", 10, 100).unwrap();
        index.insert(3, "c", 10, 200).unwrap();

        assert_eq!(index.least_recently_used().unwrap().unwrap().id, b);

        index.touch(b, 400).unwrap();
        index.delete(3).unwrap();
        assert_eq!(index.least_recently_used().unwrap().unwrap().id, a);
    }

    #[test]
    fn test_update_size() {
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let id = index.insert(1, "a", 0, 100).unwrap();
        assert!(!index.find(1, "a").unwrap().unwrap().has_bytes());

        index.update_size(id, 55, 200).unwrap();
        let record = index.find(1, "a").unwrap().unwrap();
        assert_eq!(record.byte_size, 55);
        assert_eq!(record.last_used, 200);
    }

    #[test]
    fn test_meta_insert_or_replace() {
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        assert_eq!(index.read_meta(1).unwrap(), None);

        index.write_meta(1, 10).unwrap();
        index.write_meta(1, 25).unwrap();
        assert_eq!(index.read_meta(1).unwrap(), Some(25));
    }

    #[test]
    fn test_reset_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        let mut index = SqliteCacheIndex::open(&path).unwrap();
        index.insert(1, "a", 10, 100).unwrap();
        index.write_meta(1, 10).unwrap();

        index.reset().unwrap();

        assert_eq!(index.count().unwrap(), 0);
        assert_eq!(index.read_meta(1).unwrap(), None);
        assert!(path.exists());
    }

    #[test]
    fn test_open_recreates_corrupt_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        std::fs::write(&path, vec![0x5a_u8; 4096]).unwrap();

        let index = SqliteCacheIndex::open(&path).unwrap();
        assert_eq!(index.count().unwrap(), 0);
    }
}
