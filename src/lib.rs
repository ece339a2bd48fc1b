//! Pixpipe - An image loading pipeline.
//!
//! Requests are served from an in-memory cache of decoded images, a disk
//! cache of downloaded bytes, or the network. Identical in-flight requests
//! share one fetch and decode, and results are published on a single
//! interactive loop owned by the application.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, ports and decode policy.
pub mod domain;
/// Infrastructure layer containing caches, fetching, decoding and execution.
pub mod infrastructure;

pub use domain::{DecodedImage, LoadError, LoadResult, SourceDescriptor, TargetSize};
pub use infrastructure::{
    ImagePipeline, ImageRequest, InteractiveHandle, InteractiveLoop, PipelineConfig,
    RequestCallback, RequestHandle,
};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixpipe";
