//! Port definition for the pixel decoder.

use crate::domain::entities::ImageInput;
use crate::domain::errors::LoadResult;

/// Pixels produced by a decoder before pipeline bookkeeping is applied.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Decoded pixels.
    pub pixels: image::DynamicImage,
    /// Whether the image has more than one frame.
    pub animated: bool,
}

impl DecodedFrame {
    /// Width actually produced by the decoder.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height actually produced by the decoder.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decodes encoded image bytes. Called from blocking worker threads.
pub trait ImageDecoder: Send + Sync {
    /// Reads the native dimensions without decoding pixels.
    ///
    /// # Errors
    /// Returns `DecodeFormat` if the header cannot be parsed.
    fn probe_dimensions(&self, input: &ImageInput) -> LoadResult<(u32, u32)>;

    /// Decodes at `1 / 2^sample_shift` of the native resolution.
    ///
    /// Implementations may ignore the shift; the pipeline detects that from
    /// the returned frame size.
    ///
    /// # Errors
    /// Returns `DecodeFormat` if the bytes are not a supported image.
    fn decode(&self, input: &ImageInput, sample_shift: u32) -> LoadResult<DecodedFrame>;
}
