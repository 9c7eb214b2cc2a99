//! Raster helpers: codec, cropping, resampling and mask application.
//!
//! Frames travel through the pipeline as `RgbImage`. Artifacts are stored as
//! JPEG. Masks are continuous single-channel values in `[0, 1]` produced at
//! the model's canonical resolution.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};

/// Continuous single-channel mask. 1.0 = fully clouded.
#[derive(Clone, Debug)]
pub struct Mask {
    buffer: ImageBuffer<Luma<f32>, Vec<f32>>,
}

impl Mask {
    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("mask dimensions overflow"))?;
        if values.len() != expected {
            return Err(anyhow!(
                "mask has {} values, expected {}x{}={}",
                values.len(),
                width,
                height,
                expected
            ));
        }
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
            .collect();
        let buffer = ImageBuffer::from_raw(width, height, values)
            .ok_or_else(|| anyhow!("mask buffer size mismatch"))?;
        Ok(Self { buffer })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.buffer.get_pixel(x, y).0[0]
    }

    /// Rescale to `width`x`height`.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        Self {
            buffer: imageops::resize(&self.buffer, width, height, FilterType::Nearest),
        }
    }

    /// Mean mask value, i.e. the clouded fraction of the frame.
    pub fn coverage(&self) -> f32 {
        let n = self.buffer.as_raw().len();
        if n == 0 {
            return 0.0;
        }
        self.buffer.as_raw().iter().sum::<f32>() / n as f32
    }
}

pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("failed to decode image")?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .context("failed to encode jpeg")?;
    Ok(out)
}

/// Centre square whose edge is the shorter side of the frame.
pub fn center_square(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(image, x, y, side, side).to_image()
}

/// Downscale (or upscale) to the model's square canonical resolution.
pub fn to_canonical(image: &RgbImage, size: u32) -> RgbImage {
    if image.width() == size && image.height() == size {
        return image.clone();
    }
    imageops::resize(image, size, size, FilterType::Triangle)
}

/// Mean and peak over every channel value of the frame.
pub fn brightness(image: &RgbImage) -> (f64, u8) {
    let raw = image.as_raw();
    if raw.is_empty() {
        return (0.0, 0);
    }
    let sum: u64 = raw.iter().map(|&v| v as u64).sum();
    let peak = raw.iter().copied().max().unwrap_or(0);
    (sum as f64 / raw.len() as f64, peak)
}

/// Attenuate every pixel by `1 - mask`, after rescaling the mask to the
/// frame's resolution. Clouded regions go flat black.
pub fn apply_mask(original: &RgbImage, mask: &Mask) -> RgbImage {
    let (width, height) = original.dimensions();
    let mask = mask.resized(width, height);
    let mut out = original.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let keep = 1.0 - mask.value(x, y);
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * keep).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn center_square_uses_shorter_edge() {
        let mut image = RgbImage::new(8, 4);
        image.put_pixel(2, 0, Rgb([255, 0, 0]));
        let square = center_square(&image);
        assert_eq!(square.dimensions(), (4, 4));
        assert_eq!(square.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let image = RgbImage::from_pixel(32, 24, Rgb([120, 130, 140]));
        let bytes = encode_jpeg(&image, 90).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
        assert!(decode(b"not an image").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn mask_is_rescaled_before_application() {
        let original = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        // Left half clouded at canonical 2x2.
        let mask = Mask::from_values(2, 2, vec![1.0, 0.0, 1.0, 0.0]).unwrap();
        let out = apply_mask(&original, &mask);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(0, 4), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(7, 4), &Rgb([200, 100, 50]));
    }

    #[test]
    fn mask_values_are_clamped() {
        let mask = Mask::from_values(2, 1, vec![1.5, f32::NAN]).unwrap();
        assert_eq!(mask.value(0, 0), 1.0);
        assert_eq!(mask.value(1, 0), 0.0);
        assert_eq!(mask.coverage(), 0.5);
        assert!(Mask::from_values(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn brightness_reports_mean_and_peak() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        image.put_pixel(1, 0, Rgb([60, 120, 180]));
        let (mean, peak) = brightness(&image);
        assert_eq!(mean, 60.0);
        assert_eq!(peak, 180);
    }
}
