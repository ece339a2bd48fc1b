//! Domain types for decoded images and their byte inputs.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::PathBuf;

use bytes::Bytes;

use crate::domain::services::decode_policy::{ORIENTATION_NORMAL, apply_orientation};

/// Requested decode resolution. Zero on both axes means native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSize {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
}

impl TargetSize {
    /// Native (undownsampled) size.
    pub const NATIVE: Self = Self {
        width: 0,
        height: 0,
    };

    /// Creates a target size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if no explicit target was requested.
    #[must_use]
    pub const fn is_native(self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Returns true if both dimensions are set.
    #[must_use]
    pub const fn is_explicit(self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Returns true if any dimension constrains decoding.
    #[must_use]
    pub const fn constrains_decode(self) -> bool {
        self.width > 0 || self.height > 0
    }
}

impl std::fmt::Display for TargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_native() {
            write!(f, "native")
        } else {
            write!(f, "{}x{}", self.width, self.height)
        }
    }
}

/// Readable, seekable byte stream handed to the decoder.
pub trait ImageReadSeek: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> ImageReadSeek for T {}

/// Encoded image bytes that can be opened any number of times.
///
/// Every `open` yields a fresh stream positioned at the start, so a decoder
/// that consumed the stream while probing can simply open it again.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Bytes held in memory (network downloads).
    Memory(Bytes),
    /// A file on disk (resources, assets, disk cache entries).
    File(PathBuf),
}

impl ImageInput {
    /// Opens a new stream over the input.
    ///
    /// # Errors
    /// Returns an error if the backing file cannot be opened.
    pub fn open(&self) -> std::io::Result<Box<dyn ImageReadSeek>> {
        match self {
            Self::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Self::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
        }
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Served from the in-memory cache.
    MemoryCache,
    /// Decoded from a disk cache entry.
    DiskCache,
    /// Downloaded from the network.
    Network,
    /// Decoded from a bundled resource.
    Resource,
    /// Decoded from a packaged asset.
    Asset,
}

impl std::fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::Resource => write!(f, "resource"),
            Self::Asset => write!(f, "asset"),
        }
    }
}

/// A decoded image ready for display.
///
/// Width and height are reported after downsampling and after orientation
/// correction, so a 90 degree rotated photo reports swapped dimensions.
pub struct DecodedImage {
    width: u32,
    height: u32,
    scale_shift: u32,
    orientation: u8,
    animated: bool,
    pixels: image::DynamicImage,
}

impl DecodedImage {
    /// Wraps decoded pixels with the bookkeeping of how they were produced.
    #[must_use]
    pub fn new(pixels: image::DynamicImage, scale_shift: u32, orientation: u8, animated: bool) -> Self {
        let (width, height) = apply_orientation(pixels.width(), pixels.height(), orientation);
        Self {
            width,
            height,
            scale_shift,
            orientation,
            animated,
            pixels,
        }
    }

    /// Wraps pixels decoded at native size with no orientation metadata.
    #[must_use]
    pub fn native(pixels: image::DynamicImage) -> Self {
        Self::new(pixels, 0, ORIENTATION_NORMAL, false)
    }

    /// Display width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Display height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Applied downsample shift (the image was decoded at `1 / 2^shift`).
    #[must_use]
    pub const fn scale_shift(&self) -> u32 {
        self.scale_shift
    }

    /// EXIF orientation code.
    #[must_use]
    pub const fn orientation(&self) -> u8 {
        self.orientation
    }

    /// Returns true if the source format can animate and animation was not disabled.
    #[must_use]
    pub const fn is_animated(&self) -> bool {
        self.animated
    }

    /// Returns true if the image was decoded below its native resolution.
    #[must_use]
    pub const fn is_downsampled(&self) -> bool {
        self.scale_shift > 0
    }

    /// Decoded pixel buffer.
    #[must_use]
    pub const fn pixels(&self) -> &image::DynamicImage {
        &self.pixels
    }

    /// Approximate memory held by the pixel buffer.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    /// Returns true if this image can satisfy a request for `target`.
    ///
    /// A full resolution image serves everything. A downsampled one serves only
    /// explicit targets that fit inside it.
    #[must_use]
    pub const fn serves(&self, target: TargetSize) -> bool {
        if !self.is_downsampled() {
            return true;
        }
        if target.is_native() {
            return false;
        }
        self.width >= target.width && self.height >= target.height
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("scale_shift", &self.scale_shift)
            .field("orientation", &self.orientation)
            .field("animated", &self.animated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn image(w: u32, h: u32, shift: u32) -> DecodedImage {
        DecodedImage::new(image::DynamicImage::new_rgb8(w, h), shift, ORIENTATION_NORMAL, false)
    }

    #[test]
    fn test_orientation_swaps_reported_size() {
        let img = DecodedImage::new(image::DynamicImage::new_rgb8(100, 200), 0, 6, false);
        assert_eq!((img.width(), img.height()), (200, 100));
        assert_eq!(img.pixels().width(), 100);
    }

    #[test]
    fn test_full_resolution_serves_any_target() {
        let img = image(125, 125, 0);
        assert!(img.serves(TargetSize::NATIVE));
        assert!(img.serves(TargetSize::new(500, 500)));
    }

    #[test]
    fn test_downsampled_serves_smaller_or_equal_only() {
        let img = image(125, 125, 3);
        assert!(img.serves(TargetSize::new(100, 100)));
        assert!(img.serves(TargetSize::new(125, 125)));
        assert!(!img.serves(TargetSize::new(126, 100)));
        assert!(!img.serves(TargetSize::new(100, 200)));
        assert!(!img.serves(TargetSize::NATIVE));
    }

    #[test]
    fn test_memory_input_reopens_from_start() {
        let input = ImageInput::Memory(Bytes::from_static(b"abc"));
        let mut first = String::new();
        input.open().unwrap().read_to_string(&mut first).unwrap();
        let mut second = String::new();
        input.open().unwrap().read_to_string(&mut second).unwrap();
        assert_eq!(first, "abc");
        assert_eq!(second, "abc");
    }

    #[test]
    fn test_target_size_display() {
        assert_eq!(TargetSize::NATIVE.to_string(), "native");
        assert_eq!(TargetSize::new(40, 30).to_string(), "40x30");
    }
}
