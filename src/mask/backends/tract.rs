#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::mask::model::MaskModel;
use crate::raster::Mask;

/// Tract-based backend for an ONNX cloud-mask autoencoder.
///
/// Input is NHWC `1 x S x S x 3` with raw 0..255 channel values; output is
/// an `S x S` sigmoid map (any singleton dimensions are ignored).
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    size: u32,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, side, side, 3)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, size })
    }

    fn build_input(&self, input: &RgbImage) -> Result<Tensor> {
        if input.width() != self.size || input.height() != self.size {
            return Err(anyhow!(
                "input {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.size,
                self.size
            ));
        }
        let side = self.size as usize;
        let tensor = tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            input.get_pixel(x as u32, y as u32).0[c] as f32
        });
        Ok(tensor.into_tensor())
    }

    fn extract_mask(&self, outputs: TVec<TValue>) -> Result<Mask> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect::<Vec<_>>();
        Mask::from_values(self.size, self.size, values)
    }
}

impl MaskModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn canonical_size(&self) -> u32 {
        self.size
    }

    fn infer(&mut self, input: &RgbImage) -> Result<Mask> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        self.extract_mask(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.size, self.size);
        self.infer(&blank).map(|_| ())
    }
}
