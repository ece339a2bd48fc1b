//! Disk-based cache of downloaded image bytes.
//!
//! Files live in a flat directory named by their index row id. Downloads in
//! progress use negative provisional ids so a path exists before the row does.
//! The index keeps a running byte total in its metadata table; reaching the
//! ceiling evicts least recently used entries until the total is below it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::domain::errors::{LoadError, LoadResult, StoreError, StoreResult};
use crate::domain::ports::{CacheIndexStore, IndexRecord};

use super::sqlite_index::{INDEX_FILE_NAME, SqliteCacheIndex};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Metadata row holding the running total of cached bytes.
pub const META_TOTAL_SIZE: i64 = 1;

/// Source of "now" in seconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Hash of an origin key, used as the index lookup column.
#[must_use]
pub fn origin_hash(origin_key: &str) -> i64 {
    let digest = Sha256::digest(origin_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

/// Result of [`DiskImageCache::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskLookup {
    /// No entry for the origin.
    NotFound,
    /// An entry exists; a zero size means it never completed.
    Found {
        /// Entry id.
        id: i64,
        /// Bytes recorded for the entry.
        byte_size: u64,
    },
}

impl DiskLookup {
    /// Returns true if the entry holds usable bytes.
    #[must_use]
    pub const fn has_bytes(self) -> bool {
        matches!(self, Self::Found { byte_size, .. } if byte_size > 0)
    }

    /// Entry id, if found.
    #[must_use]
    pub const fn id(self) -> Option<i64> {
        match self {
            Self::Found { id, .. } => Some(id),
            Self::NotFound => None,
        }
    }
}

type SharedStore = Arc<parking_lot::Mutex<Box<dyn CacheIndexStore>>>;

/// Runs an index call on the blocking pool.
async fn on_index<T, F>(store: &SharedStore, call: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn CacheIndexStore) -> StoreResult<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || {
        let mut store = store.lock();
        call(&mut **store)
    })
    .await
    .map_err(|e| StoreError::Database(format!("index task failed: {e}")))?
}

struct IndexState {
    store: SharedStore,
    total: u64,
}

/// Disk-based image cache that persists raw image bytes.
///
/// Index queries run on the blocking pool; the async lock orders them with
/// the file operations that depend on them.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    state: Mutex<IndexState>,
    next_provisional: AtomicI64,
    clock: Clock,
}

impl DiskImageCache {
    /// Opens a disk cache in `cache_dir` over the given index store.
    ///
    /// Leftover provisional files from an interrupted run are removed.
    ///
    /// # Errors
    /// Returns `DirectoryCreate` if the cache directory cannot be created.
    pub async fn new(
        cache_dir: PathBuf,
        max_size: u64,
        store: Box<dyn CacheIndexStore>,
    ) -> LoadResult<Self> {
        create_cache_dir(&cache_dir).await?;

        let mut state = IndexState {
            store: Arc::new(parking_lot::Mutex::new(store)),
            total: 0,
        };
        match on_index(&state.store, |s| s.read_meta(META_TOTAL_SIZE)).await {
            Ok(total) => state.total = total.and_then(|t| u64::try_from(t).ok()).unwrap_or(0),
            Err(e) => recover_store(&cache_dir, &mut state, &e).await,
        }

        remove_provisional_files(&cache_dir).await;

        debug!(
            path = %cache_dir.display(),
            total = state.total,
            max_size = max_size,
            "Opened disk cache"
        );

        Ok(Self {
            cache_dir,
            max_size,
            state: Mutex::new(state),
            next_provisional: AtomicI64::new(0),
            clock: system_clock(),
        })
    }

    /// Opens a disk cache backed by a SQLite index inside `cache_dir`.
    ///
    /// # Errors
    /// Returns an error if the directory or the index cannot be created.
    pub async fn with_sqlite_index(cache_dir: PathBuf, max_size: u64) -> LoadResult<Self> {
        create_cache_dir(&cache_dir).await?;
        let index_path = cache_dir.join(INDEX_FILE_NAME);
        let index = tokio::task::spawn_blocking(move || SqliteCacheIndex::open(&index_path))
            .await
            .map_err(|e| LoadError::store(format!("index task failed: {e}")))??;
        Self::new(cache_dir, max_size, Box::new(index)).await
    }

    /// Replaces the timestamp source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the byte ceiling; zero means unlimited.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Returns the file path for an entry id (final or provisional).
    #[must_use]
    pub fn entry_path(&self, id: i64) -> PathBuf {
        self.cache_dir.join(id.to_string())
    }

    /// Finds the entry for an origin key.
    ///
    /// The hash narrows the search, the full key decides the match. An index
    /// that cannot be read is reported as a miss.
    pub async fn lookup(&self, origin_key: &str) -> DiskLookup {
        match self.record(origin_key).await {
            Ok(Some(record)) => {
                trace!(key = %origin_key, id = record.id, size = record.byte_size, "Disk cache entry found");
                DiskLookup::Found {
                    id: record.id,
                    byte_size: record.byte_size,
                }
            }
            Ok(None) => {
                trace!(key = %origin_key, "Disk cache miss");
                DiskLookup::NotFound
            }
            Err(e) => {
                warn!(key = %origin_key, error = %e, "Disk cache lookup failed");
                DiskLookup::NotFound
            }
        }
    }

    /// Returns the full index record for an origin key.
    ///
    /// # Errors
    /// Returns an error if the index cannot be queried.
    pub async fn record(&self, origin_key: &str) -> StoreResult<Option<IndexRecord>> {
        let state = self.state.lock().await;
        let key = origin_key.to_owned();
        on_index(&state.store, move |s| s.find(origin_hash(&key), &key)).await
    }

    /// Marks an entry as used now.
    pub async fn touch(&self, id: i64) {
        let mut state = self.state.lock().await;
        let now = (self.clock)();
        if let Err(e) = on_index(&state.store, move |s| s.touch(id, now)).await {
            recover_store(&self.cache_dir, &mut state, &e).await;
        }
    }

    /// Allocates a negative id for a download that has no row yet.
    pub fn reserve_provisional_slot(&self) -> i64 {
        -(self.next_provisional.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Registers a completed download.
    ///
    /// Inserts a row, moves the provisional file to the row's path and adds
    /// the bytes to the running total, evicting if the ceiling is reached.
    /// On failure the provisional file stays where it is and the caller is
    /// responsible for deleting it.
    ///
    /// # Errors
    /// Returns `StoreIo` if the index rejects the row (the index is then
    /// recreated) or `Io` if the file cannot be moved.
    pub async fn commit(
        &self,
        provisional: &Path,
        origin_key: &str,
        byte_count: u64,
    ) -> LoadResult<i64> {
        let mut state = self.state.lock().await;
        let now = (self.clock)();

        let key = origin_key.to_owned();
        let inserted = on_index(&state.store, move |s| {
            s.insert(origin_hash(&key), &key, byte_count, now)
        })
        .await;
        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                recover_store(&self.cache_dir, &mut state, &e).await;
                return Err(e.into());
            }
        };

        let final_path = self.entry_path(id);
        if let Err(e) = fs::rename(provisional, &final_path).await {
            warn!(id = id, error = %e, "Failed to move downloaded file into cache");
            if let Err(store_err) = on_index(&state.store, move |s| s.delete(id)).await {
                recover_store(&self.cache_dir, &mut state, &store_err).await;
            }
            return Err(e.into());
        }

        state.total += byte_count;
        debug!(key = %origin_key, id = id, size = byte_count, total = state.total, "Stored image in disk cache");
        self.persist_total(&mut state).await?;
        self.evict_if_needed(&mut state).await;

        Ok(id)
    }

    /// Replaces the bytes of an existing entry with a fresh download.
    ///
    /// # Errors
    /// Returns `StoreIo` if the index cannot be updated or `Io` if the file
    /// cannot be moved.
    pub async fn refresh(
        &self,
        provisional: &Path,
        id: i64,
        old_size: u64,
        byte_count: u64,
    ) -> LoadResult<()> {
        let mut state = self.state.lock().await;

        fs::rename(provisional, self.entry_path(id)).await?;

        let now = (self.clock)();
        if let Err(e) = on_index(&state.store, move |s| s.update_size(id, byte_count, now)).await {
            recover_store(&self.cache_dir, &mut state, &e).await;
            return Err(e.into());
        }

        state.total = state.total.saturating_sub(old_size) + byte_count;
        debug!(id = id, size = byte_count, total = state.total, "Refreshed disk cache entry");
        self.persist_total(&mut state).await?;
        self.evict_if_needed(&mut state).await;
        Ok(())
    }

    /// Evicts least recently used entries until the total is below the ceiling.
    pub async fn evict_least_recently_used(&self) {
        let mut state = self.state.lock().await;
        self.evict_if_needed(&mut state).await;
    }

    /// Returns the running total of cached bytes.
    pub async fn total_bytes(&self) -> u64 {
        self.state.lock().await.total
    }

    /// Returns the number of index entries.
    pub async fn len(&self) -> u64 {
        let state = self.state.lock().await;
        on_index(&state.store, |s| s.count()).await.unwrap_or(0)
    }

    /// Returns true if the cache has no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every entry and file.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        if let Err(e) = on_index(&state.store, |s| s.reset()).await {
            error!(error = %e, "Failed to reset cache index");
        }
        state.total = 0;
        remove_entry_files(&self.cache_dir).await;
        info!("Cleared disk cache");
    }

    async fn persist_total(&self, state: &mut IndexState) -> LoadResult<()> {
        let total = i64::try_from(state.total).unwrap_or(i64::MAX);
        if let Err(e) = on_index(&state.store, move |s| s.write_meta(META_TOTAL_SIZE, total)).await {
            recover_store(&self.cache_dir, state, &e).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn evict_if_needed(&self, state: &mut IndexState) {
        if self.max_size == 0 || state.total < self.max_size {
            return;
        }

        debug!(
            current_size = state.total,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;

        while state.total >= self.max_size {
            let record = match on_index(&state.store, |s| s.least_recently_used()).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    // Nothing left to evict; the counter drifted.
                    state.total = 0;
                    break;
                }
                Err(e) => {
                    recover_store(&self.cache_dir, state, &e).await;
                    return;
                }
            };

            let path = self.entry_path(record.id);
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            }
            let id = record.id;
            if let Err(e) = on_index(&state.store, move |s| s.delete(id)).await {
                recover_store(&self.cache_dir, state, &e).await;
                return;
            }

            state.total = state.total.saturating_sub(record.byte_size);
            freed_size += record.byte_size;
            freed_count += 1;
            trace!(id = record.id, key = %record.origin_key, "Evicted disk cache entry");
        }

        if let Err(e) = self.persist_total(state).await {
            warn!(error = %e, "Failed to persist disk cache total");
        }

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

async fn create_cache_dir(cache_dir: &Path) -> LoadResult<()> {
    fs::create_dir_all(cache_dir)
        .await
        .map_err(|e| LoadError::DirectoryCreate {
            path: cache_dir.display().to_string(),
            message: e.to_string(),
        })
}

/// Recreates a failed index and drops the files it described.
async fn recover_store(cache_dir: &Path, state: &mut IndexState, cause: &StoreError) {
    warn!(error = %cause, "Cache index failure, recreating");
    if let Err(e) = on_index(&state.store, |s| s.reset()).await {
        error!(error = %e, "Failed to recreate cache index");
    }
    state.total = 0;
    remove_entry_files(cache_dir).await;
}

fn entry_id(path: &Path) -> Option<i64> {
    path.file_name()?.to_str()?.parse().ok()
}

/// Removes committed entry files (positive ids), leaving in-flight downloads.
async fn remove_entry_files(cache_dir: &Path) {
    remove_files_matching(cache_dir, |id| id > 0).await;
}

async fn remove_provisional_files(cache_dir: &Path) {
    remove_files_matching(cache_dir, |id| id < 0).await;
}

async fn remove_files_matching(cache_dir: &Path, selected: impl Fn(i64) -> bool) {
    let Ok(mut entries) = fs::read_dir(cache_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if entry_id(&path).is_some_and(&selected) && fs::remove_file(&path).await.is_err() {
            warn!(path = %path.display(), "Failed to remove cache file");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_index::FlakyIndex;
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache(max_size: u64) -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), max_size, Box::new(index))
            .await
            .unwrap();
        (cache, temp_dir)
    }

    async fn download(cache: &DiskImageCache, data: &[u8]) -> PathBuf {
        let path = cache.entry_path(cache.reserve_provisional_slot());
        fs::write(&path, data).await.unwrap();
        path
    }

    fn manual_clock(start: i64) -> (Clock, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        (Arc::new(move || handle.load(Ordering::SeqCst)), now)
    }

    #[tokio::test]
    async fn test_commit_then_lookup() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        let (clock, now) = manual_clock(1_000);
        let cache = cache.with_clock(clock);
        let key = "https://example.com/a.png";

        assert_eq!(cache.lookup(key).await, DiskLookup::NotFound);

        now.store(2_000, Ordering::SeqCst);
        let provisional = download(&cache, b"test image data").await;
        let id = cache.commit(&provisional, key, 15).await.unwrap();

        let found = cache.lookup(key).await;
        assert!(found.has_bytes());
        assert_eq!(found.id(), Some(id));
        assert_eq!(cache.record(key).await.unwrap().unwrap().last_used, 2_000);
        assert!(!provisional.exists());
        assert_eq!(fs::read(cache.entry_path(id)).await.unwrap(), b"test image data");
        assert_eq!(cache.total_bytes().await, 15);
    }

    #[tokio::test]
    async fn test_provisional_ids_are_negative_and_decreasing() {
        let (cache, _temp) = create_test_cache(1024).await;
        let first = cache.reserve_provisional_slot();
        let second = cache.reserve_provisional_slot();
        assert!(first < 0);
        assert!(second < first);
    }

    #[tokio::test]
    async fn test_touch_updates_last_used() {
        let (cache, _temp) = create_test_cache(1024).await;
        let (clock, now) = manual_clock(100);
        let cache = cache.with_clock(clock);

        let provisional = download(&cache, b"abc").await;
        let id = cache.commit(&provisional, "a", 3).await.unwrap();

        now.store(500, Ordering::SeqCst);
        cache.touch(id).await;
        assert_eq!(cache.record("a").await.unwrap().unwrap().last_used, 500);
    }

    #[tokio::test]
    async fn test_total_never_exceeds_ceiling() {
        let (cache, _temp) = create_test_cache(100).await;
        let (clock, now) = manual_clock(0);
        let cache = cache.with_clock(clock);

        for (i, size) in [40u64, 30, 50, 20, 90, 10, 150].into_iter().enumerate() {
            now.fetch_add(1, Ordering::SeqCst);
            let data = vec![0u8; usize::try_from(size).unwrap()];
            let provisional = download(&cache, &data).await;
            cache
                .commit(&provisional, &format!("key{i}"), size)
                .await
                .unwrap();
            assert!(cache.total_bytes().await < 100);
        }
    }

    #[tokio::test]
    async fn test_eviction_removes_least_recently_used() {
        let (cache, _temp) = create_test_cache(100).await;
        let (clock, now) = manual_clock(10);
        let cache = cache.with_clock(clock);

        let a = cache.commit(&download(&cache, &[1; 40]).await, "a", 40).await.unwrap();
        now.store(20, Ordering::SeqCst);
        cache.commit(&download(&cache, &[2; 40]).await, "b", 40).await.unwrap();

        // Using "a" makes "b" the eviction candidate.
        now.store(30, Ordering::SeqCst);
        cache.touch(a).await;

        now.store(40, Ordering::SeqCst);
        cache.commit(&download(&cache, &[3; 30]).await, "c", 30).await.unwrap();

        assert_eq!(cache.lookup("b").await, DiskLookup::NotFound);
        assert!(cache.lookup("a").await.has_bytes());
        assert!(cache.lookup("c").await.has_bytes());
        assert_eq!(cache.total_bytes().await, 70);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_total_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        {
            let cache = DiskImageCache::with_sqlite_index(dir.clone(), 1024).await.unwrap();
            let provisional = download(&cache, b"12345").await;
            cache.commit(&provisional, "a", 5).await.unwrap();
        }

        let cache = DiskImageCache::with_sqlite_index(dir, 1024).await.unwrap();
        assert_eq!(cache.total_bytes().await, 5);
        assert!(cache.lookup("a").await.has_bytes());
    }

    #[tokio::test]
    async fn test_open_removes_stale_provisional_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("-3"), b"partial").unwrap();

        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let _cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024, Box::new(index))
            .await
            .unwrap();

        assert!(!temp_dir.path().join("-3").exists());
    }

    #[tokio::test]
    async fn test_refresh_replaces_existing_entry() {
        let (cache, _temp) = create_test_cache(1024).await;
        let id = cache.commit(&download(&cache, b"old").await, "a", 3).await.unwrap();

        let provisional = download(&cache, b"newer").await;
        cache.refresh(&provisional, id, 3, 5).await.unwrap();

        assert_eq!(cache.total_bytes().await, 5);
        assert_eq!(cache.lookup("a").await, DiskLookup::Found { id, byte_size: 5 });
        assert_eq!(fs::read(cache.entry_path(id)).await.unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_directory_create_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let index = SqliteCacheIndex::open_in_memory().unwrap();
        let result = DiskImageCache::new(blocker.join("cache"), 1024, Box::new(index)).await;
        assert!(matches!(result, Err(LoadError::DirectoryCreate { .. })));
    }

    #[tokio::test]
    async fn test_insert_failure_recreates_index_and_keeps_provisional_file() {
        let temp_dir = TempDir::new().unwrap();
        let (index, resets) = FlakyIndex::failing_inserts();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024, Box::new(index))
            .await
            .unwrap();

        let provisional = download(&cache, b"bytes").await;
        let result = cache.commit(&provisional, "a", 5).await;

        assert!(matches!(result, Err(LoadError::StoreIo { .. })));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert!(provisional.exists());
        assert_eq!(cache.total_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, temp) = create_test_cache(1024).await;
        let id = cache.commit(&download(&cache, b"data1").await, "a", 5).await.unwrap();
        cache.commit(&download(&cache, b"data2").await, "b", 5).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await;

        assert!(cache.is_empty().await);
        assert_eq!(cache.total_bytes().await, 0);
        assert!(!temp.path().join(id.to_string()).exists());
    }

    #[test]
    fn test_origin_hash_is_stable() {
        assert_eq!(origin_hash("https://example.com/a.png"), origin_hash("https://example.com/a.png"));
        assert_ne!(origin_hash("https://example.com/a.png"), origin_hash("https://example.com/b.png"));
    }
}
