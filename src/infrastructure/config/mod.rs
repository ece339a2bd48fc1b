//! Pipeline configuration.

pub mod pipeline_config;
pub mod storage;

pub use pipeline_config::{
    DiskCacheConfig, LogLevel, MemoryCacheConfig, NetworkConfig, PipelineConfig,
};
pub use storage::{ConfigError, ConfigStorage};
