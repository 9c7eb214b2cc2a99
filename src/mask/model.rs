use anyhow::Result;
use image::RgbImage;

use crate::raster::Mask;

/// Cloud-mask model.
///
/// `infer` receives a frame already resampled to `canonical_size` squared and
/// must return a single-channel mask of the same size with values in
/// `[0, 1]` (1.0 = cloud).
pub trait MaskModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Edge length of the square input/output resolution.
    fn canonical_size(&self) -> u32;

    fn infer(&mut self, input: &RgbImage) -> Result<Mask>;

    /// Optional warm-up hook, run once when the model is opened.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
