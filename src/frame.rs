//! Raw image container shared by sources, detectors and observers.
//!
//! - `RawImage`: packed RGB24 pixels with their dimensions. Every frame
//!   source normalizes to this layout before handing a frame to the session.
//!
//! Decoding of still images and JPEG encoding for display sinks go through
//! the `image` crate.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Bytes per pixel of the packed RGB24 layout.
pub const RGB_CHANNELS: usize = 3;

/// Default JPEG quality used when frames are encoded for display.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

// ----------------------------------------------------------------------------
// RawImage: packed RGB24 frame
// ----------------------------------------------------------------------------

/// Owned RGB24 image.
///
/// Invariant: `data.len() == width * height * 3` and both dimensions are
/// non-zero. Constructors enforce it; mutators only touch pixels in bounds.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RawImage {
    /// Wrap packed RGB24 pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Image of a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode a still image (png, jpg/jpeg, bmp) into RGB24.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        Self::from_rgb_image(decoded.to_rgb8())
    }

    /// Decode an in-memory encoded image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("failed to decode image bytes")?;
        Self::from_rgb_image(decoded.to_rgb8())
    }

    pub fn from_rgb_image(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Always false for a constructed image; kept for detector precondition checks.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let offset = self.offset(x, y)?;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Set one pixel. Out-of-bounds coordinates are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + RGB_CHANNELS].copy_from_slice(&rgb);
        }
    }

    /// Encode as JPEG, e.g. for an image widget that takes encoded bytes.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        self.to_rgb_image()?
            .write_with_encoder(encoder)
            .context("failed to encode frame as JPEG")?;
        Ok(out)
    }

    /// Encode as PNG (lossless, used for snapshots in tests and the CLI).
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.to_rgb_image()?
            .write_to(&mut out, ImageFormat::Png)
            .context("failed to encode frame as PNG")?;
        Ok(out.into_inner())
    }

    /// Write to disk; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.to_rgb_image()?
            .save(path)
            .with_context(|| format!("failed to write image {}", path.display()))
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * RGB_CHANNELS)
    }
}

// Debug omits the pixel bytes.
impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("image dimensions must be non-zero ({}x{})", width, height));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_length_mismatch() {
        assert!(RawImage::new(vec![0u8; 10], 2, 2).is_err());
        assert!(RawImage::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        assert!(RawImage::new(Vec::new(), 0, 4).is_err());
        assert!(RawImage::filled(4, 0, [0, 0, 0]).is_err());
    }

    #[test]
    fn put_pixel_ignores_out_of_bounds() -> Result<()> {
        let mut image = RawImage::filled(2, 2, [10, 20, 30])?;
        image.put_pixel(1, 1, [255, 0, 0]);
        image.put_pixel(5, 5, [0, 255, 0]);

        assert_eq!(image.pixel(1, 1), Some([255, 0, 0]));
        assert_eq!(image.pixel(0, 0), Some([10, 20, 30]));
        assert_eq!(image.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn png_encoding_decodes_to_same_pixels() -> Result<()> {
        let mut image = RawImage::filled(4, 3, [1, 2, 3])?;
        image.put_pixel(2, 1, [200, 100, 50]);

        let decoded = RawImage::decode(&image.to_png()?)?;
        assert_eq!(decoded, image);
        Ok(())
    }

    #[test]
    fn jpeg_encoding_produces_jpeg_header() -> Result<()> {
        let image = RawImage::filled(8, 8, [128, 128, 128])?;
        let bytes = image.to_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn debug_output_omits_pixels() -> Result<()> {
        let image = RawImage::filled(2, 1, [9, 9, 9])?;
        let rendered = format!("{:?}", image);
        assert!(rendered.contains("width: 2"));
        assert!(rendered.contains("bytes: 6"));
        Ok(())
    }
}
