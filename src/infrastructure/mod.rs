//! Infrastructure layer with adapters for caches, network and decoding.

/// Pipeline configuration.
pub mod config;
/// Image handling (caching, fetching, decoding).
pub mod image;
/// Logging setup.
pub mod logging;
/// Request execution.
pub mod pipeline;

pub use config::{ConfigError, ConfigStorage, LogLevel, PipelineConfig};
pub use self::image::{CacheStats, DiskImageCache, MemoryImageCache};
pub use logging::{LoggingError, init_logging};
pub use pipeline::{
    ImagePipeline, ImageRequest, InteractiveHandle, InteractiveLoop, RequestCallback,
    RequestHandle,
};
