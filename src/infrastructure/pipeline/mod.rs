//! Request execution: registry, interactive queue and worker pipeline.

pub mod executor;
pub mod interactive;
mod registry;
pub mod request;

pub use executor::{DEFAULT_MAX_WORKERS, ImagePipeline, ImagePipelineBuilder, decode_input};
pub use interactive::{InteractiveHandle, InteractiveJob, InteractiveLoop};
pub use request::{ImageRequest, RequestCallback, RequestHandle, RequestId};
