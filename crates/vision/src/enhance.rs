//! Brightness/contrast boost applied to still captures before detection.

use camera_session::{FrameBuffer, FrameFormat};
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("failed to decode captured JPEG")]
    Decode(#[from] image::ImageError),
}

/// Linear per-channel transform `out = contrast * in + brightness`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnhancementParams {
    pub contrast: f32,
    pub brightness: f32,
}

impl EnhancementParams {
    pub const FLASH: Self = Self {
        contrast: 1.4,
        brightness: 20.0,
    };
    pub const NO_FLASH: Self = Self {
        contrast: 1.2,
        brightness: 10.0,
    };

    pub fn for_flash(use_flash: bool) -> Self {
        if use_flash { Self::FLASH } else { Self::NO_FLASH }
    }

    fn apply(self, channel: u8) -> u8 {
        (self.contrast * f32::from(channel) + self.brightness)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}

/// Return an enhanced copy of `src`; alpha is left untouched.
pub fn enhance(src: &RgbaImage, use_flash: bool) -> RgbaImage {
    let params = EnhancementParams::for_flash(use_flash);
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        *slot = params.apply(value as u8);
    }

    let mut out = src.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        pixel.0 = [lut[r as usize], lut[g as usize], lut[b as usize], a];
    }
    out
}

/// Decode a captured frame into an RGBA image.
pub fn decode_frame(frame: &FrameBuffer) -> Result<RgbaImage, EnhanceError> {
    match frame.format {
        FrameFormat::Rgba8 => {
            // saturates, so dimensions too large to address never match a buffer
            let expected = (frame.width as usize)
                .checked_mul(frame.height as usize)
                .and_then(|pixels| pixels.checked_mul(4))
                .unwrap_or(usize::MAX);
            if frame.data.len() != expected {
                return Err(EnhanceError::BufferSize {
                    width: frame.width,
                    height: frame.height,
                    expected,
                    actual: frame.data.len(),
                });
            }
            RgbaImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
                EnhanceError::BufferSize {
                    width: frame.width,
                    height: frame.height,
                    expected,
                    actual: frame.data.len(),
                },
            )
        }
        FrameFormat::Jpeg => {
            Ok(image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)?.to_rgba8())
        }
    }
}
