use anyhow::Result;
use image::RgbImage;

/// Camera driver.
///
/// `capture` returns one full-resolution RGB frame. Errors are per-frame:
/// the capture stage logs them and moves on to the next cycle.
pub trait Camera: Send {
    /// Driver identifier for logs.
    fn name(&self) -> &'static str;

    fn capture(&mut self) -> Result<RgbImage>;
}
