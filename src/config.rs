use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{AcceptanceFilter, CaptureOptions};
use crate::compress::CompressionOptions;

const DEFAULT_STORE_DIR: &str = "data";
const DEFAULT_MAX_RUNTIME_SECS: u64 = 60 * 60;
const DEFAULT_STORE_QUOTA_BYTES: u64 = 250 * 1024 * 1024;
const DEFAULT_TIME_UNIT_MS: u64 = 1000;
const DEFAULT_MAX_RESTARTS: u32 = 3;
const DEFAULT_CAMERA_SOURCE: &str = "stub://day";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_MIN_MEAN_BRIGHTNESS: f64 = 60.0;
const DEFAULT_MIN_PEAK_BRIGHTNESS: u8 = 200;
const DEFAULT_MODEL_BACKEND: &str = "brightness";
const DEFAULT_CANONICAL_SIZE: u32 = 256;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_DECODE_RETRY_LIMIT: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    store_dir: Option<PathBuf>,
    max_runtime_secs: Option<u64>,
    store_quota_bytes: Option<u64>,
    time_unit_ms: Option<u64>,
    space_wait_limit_secs: Option<u64>,
    max_restarts: Option<u32>,
    log_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    camera: Option<CameraConfigFile>,
    filter: Option<FilterConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    min_mean_brightness: Option<f64>,
    min_peak_brightness: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    canonical_size: Option<u32>,
    decode_retry_limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store_dir: PathBuf,
    pub max_runtime: Duration,
    pub store_quota_bytes: u64,
    pub time_unit: Duration,
    pub space_wait_limit: Option<Duration>,
    pub max_restarts: u32,
    pub log_dir: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub camera: CameraSettings,
    pub filter: AcceptanceFilter,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `stub://<scene>` or a directory of sample images.
    pub source: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub canonical_size: u32,
    pub decode_retry_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Built from an empty file, so it cannot fail.
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Defaults, then `CAPTURE_CONFIG` (JSON, or TOML by extension), then
    /// `CAPTURE_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let camera = CameraSettings {
            source: file
                .camera
                .as_ref()
                .and_then(|camera| camera.source.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let filter = AcceptanceFilter {
            min_mean_brightness: file
                .filter
                .as_ref()
                .and_then(|filter| filter.min_mean_brightness)
                .unwrap_or(DEFAULT_MIN_MEAN_BRIGHTNESS),
            min_peak_brightness: file
                .filter
                .as_ref()
                .and_then(|filter| filter.min_peak_brightness)
                .unwrap_or(DEFAULT_MIN_PEAK_BRIGHTNESS),
        };
        let model = ModelSettings {
            backend: file
                .model
                .as_ref()
                .and_then(|model| model.backend.clone())
                .unwrap_or_else(|| DEFAULT_MODEL_BACKEND.to_string()),
            model_path: file.model.as_ref().and_then(|model| model.path.clone()),
            canonical_size: file
                .model
                .as_ref()
                .and_then(|model| model.canonical_size)
                .unwrap_or(DEFAULT_CANONICAL_SIZE),
            decode_retry_limit: file
                .model
                .as_ref()
                .and_then(|model| model.decode_retry_limit)
                .unwrap_or(DEFAULT_DECODE_RETRY_LIMIT),
        };
        Self {
            store_dir: file
                .store_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            max_runtime: Duration::from_secs(
                file.max_runtime_secs.unwrap_or(DEFAULT_MAX_RUNTIME_SECS),
            ),
            store_quota_bytes: file.store_quota_bytes.unwrap_or(DEFAULT_STORE_QUOTA_BYTES),
            time_unit: Duration::from_millis(file.time_unit_ms.unwrap_or(DEFAULT_TIME_UNIT_MS)),
            space_wait_limit: file.space_wait_limit_secs.map(Duration::from_secs),
            max_restarts: file.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
            log_dir: file.log_dir,
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            camera,
            filter,
            model,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("CAPTURE_STORE_DIR") {
            if !dir.trim().is_empty() {
                self.store_dir = PathBuf::from(dir);
            }
        }
        if let Ok(secs) = std::env::var("CAPTURE_MAX_RUNTIME_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("CAPTURE_MAX_RUNTIME_SECS must be an integer number of seconds")
            })?;
            self.max_runtime = Duration::from_secs(secs);
        }
        if let Ok(bytes) = std::env::var("CAPTURE_STORE_QUOTA_BYTES") {
            self.store_quota_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAPTURE_STORE_QUOTA_BYTES must be an integer byte count"))?;
        }
        if let Ok(source) = std::env::var("CAPTURE_CAMERA") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(backend) = std::env::var("CAPTURE_MODEL") {
            if !backend.trim().is_empty() {
                self.model.backend = backend;
            }
        }
        if let Ok(path) = std::env::var("CAPTURE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("CAPTURE_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_runtime.is_zero() {
            return Err(anyhow!("max runtime must be greater than zero"));
        }
        if self.store_quota_bytes == 0 {
            return Err(anyhow!("store quota must be greater than zero"));
        }
        if self.time_unit.is_zero() {
            return Err(anyhow!("time unit must be greater than zero"));
        }
        if self.model.canonical_size == 0 {
            return Err(anyhow!("model canonical size must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if !(0.0..=255.0).contains(&self.filter.min_mean_brightness) {
            return Err(anyhow!("min mean brightness must be within 0..=255"));
        }
        Ok(())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            unit: self.time_unit,
            space_wait_limit: self.space_wait_limit,
            filter: self.filter,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn compression_options(&self) -> CompressionOptions {
        CompressionOptions {
            poll_interval: self.time_unit,
            jpeg_quality: self.jpeg_quality,
            decode_retry_limit: self.model.decode_retry_limit,
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
