use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::camera::source::Camera;

/// Synthetic camera. Daylight frames are a sky gradient with one drifting
/// bright cloud; night frames stay dark everywhere.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    night: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, night: bool) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            night,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn day_pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        let (w, h) = (self.width as i64, self.height as i64);
        let cx = (self.frame_count as i64 * 7) % w;
        let cy = h / 2;
        let r = (w.min(h) / 4).max(1);
        let (dx, dy) = (x as i64 - cx, y as i64 - cy);
        if dx * dx + dy * dy <= r * r {
            return Rgb([235, 235, 240]);
        }
        let shade = (y as i64 * 80 / h.max(1)) as u8;
        Rgb([40 + shade / 2, 90 + shade, 170 + shade / 2])
    }

    fn night_pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        let v = ((x as u64 + y as u64 + self.frame_count) % 40) as u8;
        Rgb([v, v, v + 5])
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn capture(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        let frame = RgbImage::from_fn(self.width, self.height, |x, y| {
            if self.night {
                self.night_pixel(x, y)
            } else {
                self.day_pixel(x, y)
            }
        });
        Ok(frame)
    }
}
