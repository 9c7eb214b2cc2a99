//! Pipeline supervisor.
//!
//! Runs the capture and compression stages on two threads that share only
//! the run token and the store. Neither stage can stop the other: capture
//! running out of space leaves compression draining the queue until the
//! deadline. A stage whose collaborator fails to open logs and returns at
//! once; a stage whose thread panics is reported as crashed.
//!
//! `run_until_deadline` is the outer crash-resilience loop. It re-runs the
//! pair while time remains, nothing was cancelled, and neither stage ended
//! on a budget signal.

use anyhow::Result;
use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::budget::Budget;
use crate::camera::{self, Camera};
use crate::capture::{CaptureOptions, CaptureReport, CaptureStage};
use crate::clock::RunToken;
use crate::compress::{CompressionOptions, CompressionReport, CompressionStage};
use crate::config::{CameraSettings, ModelSettings, PipelineConfig};
use crate::mask::{self, MaskModel};
use crate::status::StoreStatus;
use crate::store::ItemStore;

/// Opens the external collaborators, once per stage start.
pub trait Collaborators: Send + Sync {
    fn open_camera(&self) -> Result<Box<dyn Camera>>;
    fn open_model(&self) -> Result<Box<dyn MaskModel>>;
}

/// Collaborators described by the pipeline configuration.
pub struct ConfiguredCollaborators {
    pub camera: CameraSettings,
    pub model: ModelSettings,
}

impl Collaborators for ConfiguredCollaborators {
    fn open_camera(&self) -> Result<Box<dyn Camera>> {
        camera::open_camera(&self.camera)
    }

    fn open_model(&self) -> Result<Box<dyn MaskModel>> {
        mask::open_model(&self.model)
    }
}

/// Outcome of one run of the stage pair.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub capture: CaptureReport,
    pub compression: CompressionReport,
}

impl RunReport {
    pub fn ended_on_budget_signal(&self) -> bool {
        self.capture.outcome.is_budget_signal() || self.compression.outcome.is_budget_signal()
    }
}

pub struct Supervisor {
    store: Arc<dyn ItemStore>,
    token: Arc<RunToken>,
    collaborators: Arc<dyn Collaborators>,
    quota_bytes: u64,
    capture: CaptureOptions,
    compression: CompressionOptions,
    max_restarts: u32,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn ItemStore>,
        token: Arc<RunToken>,
        collaborators: Arc<dyn Collaborators>,
        quota_bytes: u64,
    ) -> Self {
        Self {
            store,
            token,
            collaborators,
            quota_bytes,
            capture: CaptureOptions::default(),
            compression: CompressionOptions::default(),
            max_restarts: 0,
        }
    }

    pub fn from_config(
        cfg: &PipelineConfig,
        store: Arc<dyn ItemStore>,
        token: Arc<RunToken>,
    ) -> Self {
        let collaborators = Arc::new(ConfiguredCollaborators {
            camera: cfg.camera.clone(),
            model: cfg.model.clone(),
        });
        Self::new(store, token, collaborators, cfg.store_quota_bytes)
            .with_capture_options(cfg.capture_options())
            .with_compression_options(cfg.compression_options())
            .with_max_restarts(cfg.max_restarts)
    }

    pub fn with_capture_options(mut self, options: CaptureOptions) -> Self {
        self.capture = options;
        self
    }

    pub fn with_compression_options(mut self, options: CompressionOptions) -> Self {
        self.compression = options;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn token(&self) -> &Arc<RunToken> {
        &self.token
    }

    /// Start both stages and wait for both to finish.
    pub fn run_pair(&self) -> RunReport {
        let capture = {
            let collaborators = Arc::clone(&self.collaborators);
            let store = Arc::clone(&self.store);
            let budget = Budget::new(Arc::clone(&self.token), Arc::clone(&store), self.quota_bytes);
            let options = self.capture.clone();
            spawn_worker("capture", move || match collaborators.open_camera() {
                Ok(camera) => CaptureStage::new(camera, store, budget, options).run(),
                Err(e) => {
                    log::error!("capture stage unavailable: {:#}", e);
                    CaptureReport::unavailable(format!("{:#}", e))
                }
            })
        };
        let compression = {
            let collaborators = Arc::clone(&self.collaborators);
            let store = Arc::clone(&self.store);
            let token = Arc::clone(&self.token);
            let options = self.compression.clone();
            spawn_worker("compression", move || match collaborators.open_model() {
                Ok(model) => CompressionStage::new(model, store, token, options).run(),
                Err(e) => {
                    log::error!("compression stage unavailable: {:#}", e);
                    CompressionReport::unavailable(format!("{:#}", e))
                }
            })
        };

        let capture = join_worker("capture", capture, CaptureReport::crashed);
        let compression = join_worker("compression", compression, CompressionReport::crashed);
        log::info!(
            "run finished: capture {} ({} items), compression {} ({} processed)",
            capture.outcome,
            capture.items_committed,
            compression.outcome,
            compression.processed
        );
        RunReport {
            capture,
            compression,
        }
    }

    /// Run the pair, restarting it after an early exit, until the deadline.
    pub fn run_until_deadline(&self) -> Vec<RunReport> {
        let mut runs = Vec::new();
        let mut restarts = 0;
        loop {
            let report = self.run_pair();
            let budget_signal = report.ended_on_budget_signal();
            runs.push(report);

            if self.token.is_cancelled() {
                log::info!("run cancelled");
                break;
            }
            if budget_signal {
                break;
            }
            let remaining = self.token.time_remaining();
            if remaining <= 0.0 {
                break;
            }
            if restarts >= self.max_restarts {
                log::warn!(
                    "stages ended early with {:.1}s left; restart limit ({}) reached",
                    remaining,
                    self.max_restarts
                );
                break;
            }
            restarts += 1;
            log::warn!(
                "stages ended early with {:.1}s left; restarting ({}/{})",
                remaining,
                restarts,
                self.max_restarts
            );
            self.token.sleep(self.capture.unit);
        }

        match StoreStatus::collect(self.store.as_ref()) {
            Ok(status) => log::info!("store: {}", status.summary()),
            Err(e) => log::warn!("could not summarise store: {:#}", e),
        }
        runs
    }
}

fn spawn_worker<T, F>(name: &str, work: F) -> std::io::Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(work)
}

fn join_worker<T>(
    name: &str,
    handle: std::io::Result<JoinHandle<T>>,
    crashed: fn(String) -> T,
) -> T {
    let handle = match handle {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("failed to start {} worker: {}", name, e);
            return crashed(e.to_string());
        }
    };
    match handle.join() {
        Ok(report) => report,
        Err(payload) => {
            let why = panic_message(payload.as_ref());
            log::error!("{} worker panicked: {}", name, why);
            crashed(why)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
