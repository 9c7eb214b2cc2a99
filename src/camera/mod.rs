//! Camera collaborators.
//!
//! The capture stage only sees the `Camera` trait. Sources:
//! - `stub://day` / `stub://night` (any other `stub://` name is daylight):
//!   synthetic frames for tests and bench runs
//! - a local directory of sample images, one picked at random per capture
//!
//! Opening a camera may fail (missing directory, no usable images). That is
//! the "collaborator unavailable" case: the capture stage logs it and exits,
//! the rest of the run carries on.

mod backends;
mod source;

use anyhow::Result;

pub use backends::{DirectoryCamera, SyntheticCamera};
pub use source::Camera;

use crate::config::CameraSettings;

/// Open the camera described by `settings`.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    if let Some(scene) = settings.source.strip_prefix("stub://") {
        let camera = SyntheticCamera::new(settings.width, settings.height, scene == "night");
        log::info!("camera: synthetic {} ({}x{})", scene, settings.width, settings.height);
        return Ok(Box::new(camera));
    }
    let camera = DirectoryCamera::open(&settings.source)?;
    log::info!(
        "camera: {} sample images from {}",
        camera.len(),
        settings.source
    );
    Ok(Box::new(camera))
}
