//! Domain layer with entities, errors, collaborator ports and pure policy.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Pure decode policy.
pub mod services;

pub use entities::{DecodedImage, ImageInput, RequestOptions, SourceDescriptor, TargetSize};
pub use errors::{LoadError, LoadResult, StoreError};
pub use ports::{ImageDecoder, TargetSurface};
