//! Port definition for image metadata.

use crate::domain::entities::ImageInput;

/// Reads orientation metadata from encoded bytes.
pub trait OrientationReader: Send + Sync {
    /// Returns the EXIF orientation code, or `None` when it is absent or
    /// unreadable. Failures must never abort a request.
    fn read_orientation(&self, input: &ImageInput) -> Option<u8>;
}
