//! Port definitions for external collaborators.

mod cache_index_port;
mod decoder_port;
mod metadata_port;
mod resource_port;
mod surface_port;

pub use cache_index_port::{CacheIndexStore, IndexRecord};
pub use decoder_port::{DecodedFrame, ImageDecoder};
pub use metadata_port::OrientationReader;
pub use resource_port::ResourceProvider;
pub use surface_port::{DisplayParams, TargetSurface};
