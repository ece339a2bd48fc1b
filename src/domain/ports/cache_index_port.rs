//! Port definition for the persistent disk cache index.

use crate::domain::errors::StoreResult;

/// One row of the disk cache index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Row id; also the cache file name.
    pub id: i64,
    /// Hash of the origin key, used as the lookup index.
    pub origin_hash: i64,
    /// Full origin key.
    pub origin_key: String,
    /// Cached byte count; zero means the fetch never completed.
    pub byte_size: u64,
    /// Last use as seconds since the Unix epoch.
    pub last_used: i64,
}

impl IndexRecord {
    /// Returns true if the entry holds usable bytes.
    #[must_use]
    pub const fn has_bytes(&self) -> bool {
        self.byte_size > 0
    }
}

/// Record store backing the disk cache.
///
/// Implementations only need to be `Send`; the disk cache serializes access.
pub trait CacheIndexStore: Send {
    /// Finds the entry whose hash and key both match.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    fn find(&self, origin_hash: i64, origin_key: &str) -> StoreResult<Option<IndexRecord>>;

    /// Inserts a new entry and returns its id.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    fn insert(
        &self,
        origin_hash: i64,
        origin_key: &str,
        byte_size: u64,
        last_used: i64,
    ) -> StoreResult<i64>;

    /// Sets the last-used timestamp of an entry.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    fn touch(&self, id: i64, last_used: i64) -> StoreResult<()>;

    /// Sets size and last-used timestamp of an entry.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    fn update_size(&self, id: i64, byte_size: u64, last_used: i64) -> StoreResult<()>;

    /// Returns the entry with the oldest last-used timestamp.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    fn least_recently_used(&self) -> StoreResult<Option<IndexRecord>>;

    /// Returns the number of entries.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    fn count(&self) -> StoreResult<u64>;

    /// Deletes an entry.
    ///
    /// # Errors
    /// Returns an error if the row cannot be deleted.
    fn delete(&self, id: i64) -> StoreResult<()>;

    /// Reads an integer from the metadata table.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    fn read_meta(&self, key: i64) -> StoreResult<Option<i64>>;

    /// Inserts or replaces an integer in the metadata table.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    fn write_meta(&self, key: i64, value: i64) -> StoreResult<()>;

    /// Drops all data and recreates an empty store.
    ///
    /// # Errors
    /// Returns an error if the store cannot be recreated.
    fn reset(&mut self) -> StoreResult<()>;
}
