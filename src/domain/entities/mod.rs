//! Domain entities.

mod image;
mod request;

pub use self::image::{DecodedImage, ImageInput, ImageReadSeek, LoadOrigin, TargetSize};
pub use request::{
    CachePolicy, FadeSpec, NO_ANIMATION_SUFFIX, RequestOptions, ScaleMode, SourceDescriptor,
};
