//! Decoder and metadata adapters backed by the `image` crate.

use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{AnimationDecoder, ImageDecoder as _, ImageFormat, ImageReader};
use tracing::trace;

use crate::domain::entities::{ImageInput, ImageReadSeek};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DecodedFrame, ImageDecoder, OrientationReader};

fn reader(input: &ImageInput) -> LoadResult<ImageReader<Box<dyn ImageReadSeek>>> {
    let reader = ImageReader::new(input.open()?)
        .with_guessed_format()
        .map_err(|e| LoadError::decode(e.to_string()))?;
    Ok(reader)
}

/// Returns true if a GIF stream holds more than one frame.
fn is_multi_frame_gif(input: &ImageInput) -> bool {
    let Ok(stream) = input.open() else {
        return false;
    };
    let Ok(decoder) = GifDecoder::new(stream) else {
        return false;
    };
    decoder.into_frames().take(2).filter(Result::is_ok).count() > 1
}

/// Decoder for the formats compiled into the `image` crate.
///
/// The crate has no native subsampled decode, so the full image is decoded
/// and then resized to the requested fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn probe_dimensions(&self, input: &ImageInput) -> LoadResult<(u32, u32)> {
        reader(input)?
            .into_dimensions()
            .map_err(|e| LoadError::decode(e.to_string()))
    }

    fn decode(&self, input: &ImageInput, sample_shift: u32) -> LoadResult<DecodedFrame> {
        let reader = reader(input)?;
        let is_gif = reader.format() == Some(ImageFormat::Gif);
        let pixels = reader
            .decode()
            .map_err(|e| LoadError::decode(e.to_string()))?;
        let animated = is_gif && is_multi_frame_gif(input);

        if sample_shift == 0 {
            return Ok(DecodedFrame { pixels, animated });
        }

        let width = pixels.width().checked_shr(sample_shift).unwrap_or(0).max(1);
        let height = pixels.height().checked_shr(sample_shift).unwrap_or(0).max(1);
        trace!(
            from_width = pixels.width(),
            from_height = pixels.height(),
            width = width,
            height = height,
            "Subsampling decoded image"
        );
        let pixels = pixels.resize_exact(width, height, FilterType::Triangle);
        Ok(DecodedFrame { pixels, animated })
    }
}

/// Maps a decoder orientation to its EXIF code.
const fn exif_code(orientation: Orientation) -> u8 {
    match orientation {
        Orientation::NoTransforms => 1,
        Orientation::FlipHorizontal => 2,
        Orientation::Rotate180 => 3,
        Orientation::FlipVertical => 4,
        Orientation::Rotate90FlipH => 5,
        Orientation::Rotate90 => 6,
        Orientation::Rotate270FlipH => 7,
        Orientation::Rotate270 => 8,
    }
}

/// Reads EXIF orientation through the format decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifOrientationReader;

impl OrientationReader for ExifOrientationReader {
    fn read_orientation(&self, input: &ImageInput) -> Option<u8> {
        let mut decoder = reader(input).ok()?.into_decoder().ok()?;
        decoder.orientation().ok().map(exif_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::codecs::gif::GifEncoder;
    use image::{DynamicImage, Frame, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(width: u32, height: u32, format: ImageFormat) -> ImageInput {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        ImageInput::Memory(Bytes::from(buf))
    }

    #[test]
    fn test_probe_dimensions() {
        let input = encode(64, 32, ImageFormat::Png);
        assert_eq!(ImageCrateDecoder.probe_dimensions(&input).unwrap(), (64, 32));
    }

    #[test]
    fn test_decode_applies_sample_shift() {
        let input = encode(64, 32, ImageFormat::Png);
        let frame = ImageCrateDecoder.decode(&input, 2).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
        assert!(!frame.animated);
    }

    #[test]
    fn test_decode_never_shrinks_below_one_pixel() {
        let input = encode(4, 2, ImageFormat::Png);
        let frame = ImageCrateDecoder.decode(&input, 5).unwrap();
        assert_eq!((frame.width(), frame.height()), (1, 1));
    }

    #[test]
    fn test_single_frame_gif_is_still() {
        let input = encode(8, 8, ImageFormat::Gif);
        assert!(!ImageCrateDecoder.decode(&input, 0).unwrap().animated);
    }

    #[test]
    fn test_multi_frame_gif_is_animated() {
        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            let frames = (0..3u8)
                .map(|i| Frame::new(RgbaImage::from_pixel(8, 8, Rgba([i * 80, 0, 0, 255]))));
            encoder.encode_frames(frames).unwrap();
        }
        let input = ImageInput::Memory(Bytes::from(buf));

        let frame = ImageCrateDecoder.decode(&input, 0).unwrap();
        assert!(frame.animated);
        assert_eq!((frame.width(), frame.height()), (8, 8));
    }

    #[test]
    fn test_garbage_is_decode_format_error() {
        let input = ImageInput::Memory(Bytes::from_static(b"definitely not an image"));
        assert!(matches!(
            ImageCrateDecoder.decode(&input, 0),
            Err(LoadError::DecodeFormat { .. })
        ));
        assert!(matches!(
            ImageCrateDecoder.probe_dimensions(&input),
            Err(LoadError::DecodeFormat { .. })
        ));
    }

    #[test]
    fn test_orientation_defaults_to_normal() {
        let input = encode(8, 8, ImageFormat::Png);
        assert_eq!(ExifOrientationReader.read_orientation(&input), Some(1));
    }

    #[test]
    fn test_orientation_unreadable_input() {
        let input = ImageInput::File("/nonexistent/image.png".into());
        assert_eq!(ExifOrientationReader.read_orientation(&input), None);
    }

    #[test]
    fn test_exif_codes() {
        assert_eq!(exif_code(Orientation::Rotate90), 6);
        assert_eq!(exif_code(Orientation::Rotate270FlipH), 7);
    }
}
