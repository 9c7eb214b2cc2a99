//! Cloud-mask inference collaborators.
//!
//! The compression stage only sees the `MaskModel` trait. Backends:
//! - `brightness`: CPU heuristic, always available
//! - `tract`: ONNX model via tract (feature: backend-tract)

mod backends;
mod model;

use anyhow::{anyhow, Result};
use image::RgbImage;

#[cfg(feature = "backend-tract")]
pub use backends::TractModel;
pub use backends::BrightnessModel;
pub use model::MaskModel;

use crate::config::ModelSettings;
use crate::raster::{self, Mask};

/// Open and warm up the model described by `settings`.
pub fn open_model(settings: &ModelSettings) -> Result<Box<dyn MaskModel>> {
    let mut model: Box<dyn MaskModel> = match settings.backend.as_str() {
        "brightness" => Box::new(BrightnessModel::new(settings.canonical_size)),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
            Box::new(TractModel::new(path, settings.canonical_size)?)
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => return Err(anyhow!("tract backend requires the backend-tract feature")),
        other => return Err(anyhow!("unknown mask backend '{}'", other)),
    };
    model.warm_up()?;
    log::info!(
        "mask model '{}' ready at {}x{}",
        model.name(),
        model.canonical_size(),
        model.canonical_size()
    );
    Ok(model)
}

/// Resample `frame` to the model's canonical resolution and infer a mask.
///
/// The returned mask is still at canonical resolution; callers rescale it
/// to the frame before combining.
pub fn create_mask(model: &mut dyn MaskModel, frame: &RgbImage) -> Result<Mask> {
    let size = model.canonical_size();
    let input = raster::to_canonical(frame, size);
    let mask = model.infer(&input)?;
    if mask.width() != size || mask.height() != size {
        return Err(anyhow!(
            "model '{}' returned a {}x{} mask, expected {}x{}",
            model.name(),
            mask.width(),
            mask.height(),
            size,
            size
        ));
    }
    Ok(mask)
}
