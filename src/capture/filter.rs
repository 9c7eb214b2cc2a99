use image::RgbImage;

use crate::raster::brightness;

/// Outcome of the acceptance check on a captured frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameVerdict {
    Accept,
    /// Too dark to carry information (night side, lens cap, ...).
    RejectLowLight { mean: f64, peak: u8 },
}

/// Rejects low-information frames before they cost storage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcceptanceFilter {
    pub min_mean_brightness: f64,
    pub min_peak_brightness: u8,
}

impl Default for AcceptanceFilter {
    fn default() -> Self {
        Self {
            min_mean_brightness: 60.0,
            min_peak_brightness: 200,
        }
    }
}

impl AcceptanceFilter {
    /// Accept everything. Used when filtering is disabled.
    pub fn accept_all() -> Self {
        Self {
            min_mean_brightness: 0.0,
            min_peak_brightness: 0,
        }
    }

    pub fn evaluate(&self, frame: &RgbImage) -> FrameVerdict {
        let (mean, peak) = brightness(frame);
        if mean < self.min_mean_brightness || peak < self.min_peak_brightness {
            FrameVerdict::RejectLowLight { mean, peak }
        } else {
            FrameVerdict::Accept
        }
    }
}
