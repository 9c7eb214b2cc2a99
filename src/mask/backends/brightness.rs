use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::mask::model::MaskModel;
use crate::raster::Mask;

/// CPU cloud heuristic: bright, unsaturated pixels score high.
pub struct BrightnessModel {
    size: u32,
    /// Normalised brightness below which nothing counts as cloud.
    floor: f32,
    /// Saturation above which nothing counts as cloud.
    max_saturation: f32,
}

impl BrightnessModel {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            floor: 0.55,
            max_saturation: 0.25,
        }
    }

    fn score(&self, rgb: [u8; 3]) -> f32 {
        let max = rgb.iter().copied().max().unwrap_or(0) as f32;
        let min = rgb.iter().copied().min().unwrap_or(0) as f32;
        if max == 0.0 {
            return 0.0;
        }
        let brightness = rgb.iter().map(|&c| c as f32).sum::<f32>() / (3.0 * 255.0);
        let saturation = (max - min) / max;
        let bright = ((brightness - self.floor) / (1.0 - self.floor)).clamp(0.0, 1.0);
        let grey = (1.0 - saturation / self.max_saturation).clamp(0.0, 1.0);
        bright * grey
    }
}

impl MaskModel for BrightnessModel {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn canonical_size(&self) -> u32 {
        self.size
    }

    fn infer(&mut self, input: &RgbImage) -> Result<Mask> {
        if input.width() != self.size || input.height() != self.size {
            return Err(anyhow!(
                "input {}x{} does not match canonical {}x{}",
                input.width(),
                input.height(),
                self.size,
                self.size
            ));
        }
        let values = input.pixels().map(|p| self.score(p.0)).collect();
        Mask::from_values(self.size, self.size, values)
    }
}
