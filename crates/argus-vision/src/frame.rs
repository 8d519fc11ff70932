//! In-memory raster frames.

use image::{DynamicImage, ImageBuffer, Rgb};

use crate::error::{VisionError, VisionResult};

/// An RGB pixel buffer produced by a decoder and consumed by the detector.
///
/// Frames are ephemeral: decoded, inferred on, then dropped. The buffer is
/// tightly packed rgb24 (`width * height * 3` bytes).
#[derive(Debug, Clone)]
pub struct RasterFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RasterFrame {
    /// Wrap a raw rgb24 buffer, validating its length.
    pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>) -> VisionResult<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(VisionError::internal(format!(
                "Invalid frame buffer length: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode an encoded image (PNG, JPEG, ...) into a frame.
    pub fn decode_image(bytes: &[u8]) -> VisionResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| VisionError::decode_read(format!("Invalid image payload: {}", e)))?;
        Ok(Self::from_dynamic(&img))
    }

    /// Convert a loaded image into an rgb24 frame.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            data: rgb.into_raw(),
        }
    }

    /// View the frame as a `DynamicImage` for resizing/preprocessing.
    pub fn to_dynamic(&self) -> VisionResult<DynamicImage> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                .ok_or_else(|| VisionError::internal("Failed to create image buffer"))?;
        Ok(DynamicImage::ImageRgb8(buffer))
    }

    /// Buffer length in bytes for a frame of the given dimensions.
    pub fn byte_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }
}
