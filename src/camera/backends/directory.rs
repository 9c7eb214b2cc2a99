use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

use crate::camera::source::Camera;
use crate::raster;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Camera stand-in that replays sample images from a local directory.
///
/// Each capture picks one file at random and decodes it.
pub struct DirectoryCamera {
    files: Vec<PathBuf>,
}

impl DirectoryCamera {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("camera directory {} is not readable", dir.display()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        if files.is_empty() {
            return Err(anyhow!("no sample images in {}", dir.display()));
        }
        files.sort();
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl Camera for DirectoryCamera {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn capture(&mut self) -> Result<RgbImage> {
        let path = self
            .files
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| anyhow!("no sample images left"))?;
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let frame = raster::decode(&bytes)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        log::debug!("camera: loaded {}", path.display());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        assert!(DirectoryCamera::open(dir.path()).is_err());
        assert!(DirectoryCamera::open(dir.path().join("missing")).is_err());
    }

    #[test]
    fn captures_one_of_the_sample_images() {
        let dir = tempfile::tempdir().unwrap();
        let sample = RgbImage::from_pixel(12, 10, Rgb([10, 200, 30]));
        let bytes = raster::encode_jpeg(&sample, 95).unwrap();
        std::fs::write(dir.path().join("a.JPG"), &bytes).unwrap();

        let mut camera = DirectoryCamera::open(dir.path()).unwrap();
        assert_eq!(camera.len(), 1);
        let frame = camera.capture().unwrap();
        assert_eq!(frame.dimensions(), (12, 10));
    }
}
