//! Capture Kernel
//!
//! Budgeted image capture with on-device cloud-mask compression.
//!
//! # Architecture
//!
//! Two workers share one store directory and one deadline:
//!
//! 1. **Capture**: paces captures so the storage quota lasts until the
//!    deadline, filters low-light frames, and commits each frame as a new
//!    Item.
//! 2. **Compression**: masks out cloud cover in every committed Item except
//!    the newest, writes the masked frame, and deletes the original.
//!
//! The store is the only channel between them. Item directories are
//! write-once per side, so neither worker needs locks.
//!
//! # Module Structure
//!
//! - `clock`, `budget`: run deadline, cancellation, time and space budgets
//! - `schedule`: throughput estimate and inter-capture delay
//! - `capture`, `compress`: the two stages
//! - `store`, `item`, `status`: the shared store and its Items
//! - `camera`, `mask`, `raster`: external collaborators and image handling
//! - `supervisor`: runs and restarts the stage pair
//! - `config`, `logging`: daemon setup

pub mod budget;
pub mod camera;
pub mod capture;
pub mod clock;
pub mod compress;
pub mod config;
pub mod item;
pub mod logging;
pub mod mask;
pub mod raster;
pub mod schedule;
pub mod stage;
pub mod status;
pub mod store;
pub mod supervisor;

pub use budget::Budget;
pub use camera::{open_camera, Camera, DirectoryCamera, SyntheticCamera};
pub use capture::{
    AcceptanceFilter, CaptureOptions, CaptureReport, CaptureStage, CaptureState, FrameVerdict,
};
pub use clock::{Clock, ManualClock, RunToken, SystemClock};
pub use compress::{
    CompressionOptions, CompressionReport, CompressionStage, Inspection, ItemClass, QueueScanner,
    ScanCounts,
};
pub use config::{CameraSettings, ModelSettings, PipelineConfig};
pub use item::{ItemId, ItemIdGenerator, DERIVED_FILE, ORIGINAL_FILE};
pub use mask::{create_mask, open_model, BrightnessModel, MaskModel};
pub use raster::Mask;
pub use schedule::{items_remaining, next_delay, CaptureScheduler, ThroughputEstimator};
pub use stage::{Cycle, Decision, StageOutcome, StopReason};
pub use status::StoreStatus;
pub use store::{FsStore, InMemoryStore, ItemStore};
pub use supervisor::{Collaborators, ConfiguredCollaborators, RunReport, Supervisor};
