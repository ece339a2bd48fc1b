//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - Disk caching with a SQLite index
//! - HTTP downloads
//! - Decoding through the `image` crate
//! - Resources and assets read from local directories

pub mod codec;
pub mod disk_cache;
pub mod fetcher;
pub mod memory_cache;
pub mod resources;
pub mod sqlite_index;

pub use codec::{ExifOrientationReader, ImageCrateDecoder};
pub use disk_cache::{DiskImageCache, DiskLookup};
pub use fetcher::{HttpFetcher, settle_download};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use resources::DirectoryResources;
pub use sqlite_index::SqliteCacheIndex;
