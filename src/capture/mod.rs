//! Capture stage: the producer side of the pipeline.
//!
//! One cycle walks `idle -> waiting-for-space -> capturing -> filtering ->
//! committing -> idle`. A failed cycle (camera or store error) and a rejected
//! frame each cost one idle unit and the loop continues; only a budget signal
//! or cancellation ends it.
//!
//! The stage only ever creates new Items and writes each original exactly
//! once. It never touches an Item again after committing it.

mod filter;

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use filter::{AcceptanceFilter, FrameVerdict};

use crate::budget::Budget;
use crate::camera::Camera;
use crate::item::ItemIdGenerator;
use crate::raster;
use crate::schedule::CaptureScheduler;
use crate::stage::{Cycle, StageOutcome, StopReason};
use crate::store::ItemStore;

/// Tunables for the capture stage.
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    /// Polling interval and minimum inter-capture delay.
    pub unit: Duration,
    /// Bound on the post-commit headroom wait (`None` = until deadline).
    pub space_wait_limit: Option<Duration>,
    pub filter: AcceptanceFilter,
    pub jpeg_quality: u8,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            space_wait_limit: None,
            filter: AcceptanceFilter::default(),
            jpeg_quality: 90,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    WaitingForSpace,
    Capturing,
    Filtering,
    Committing,
    Exhausted,
    DeadlineExceeded,
    Fatal,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingForSpace => "waiting-for-space",
            Self::Capturing => "capturing",
            Self::Filtering => "filtering",
            Self::Committing => "committing",
            Self::Exhausted => "exhausted",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Summary of one capture stage run.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureReport {
    pub outcome: StageOutcome,
    pub items_committed: u64,
    pub bytes_written: u64,
    pub frames_rejected: u64,
    pub cycle_failures: u64,
}

impl CaptureReport {
    pub fn unavailable(why: String) -> Self {
        Self::without_work(StageOutcome::Unavailable(why))
    }

    pub fn crashed(why: String) -> Self {
        Self::without_work(StageOutcome::Crashed(why))
    }

    fn without_work(outcome: StageOutcome) -> Self {
        Self {
            outcome,
            items_committed: 0,
            bytes_written: 0,
            frames_rejected: 0,
            cycle_failures: 0,
        }
    }
}

pub struct CaptureStage {
    camera: Box<dyn Camera>,
    store: Arc<dyn ItemStore>,
    budget: Budget,
    scheduler: CaptureScheduler,
    filter: AcceptanceFilter,
    jpeg_quality: u8,
    ids: ItemIdGenerator,
    state: CaptureState,
    frames_rejected: u64,
    cycle_failures: u64,
}

impl CaptureStage {
    pub fn new(
        camera: Box<dyn Camera>,
        store: Arc<dyn ItemStore>,
        budget: Budget,
        options: CaptureOptions,
    ) -> Self {
        let scheduler =
            CaptureScheduler::new(options.unit).with_space_wait_limit(options.space_wait_limit);
        Self {
            camera,
            store,
            budget,
            scheduler,
            filter: options.filter,
            jpeg_quality: options.jpeg_quality,
            ids: ItemIdGenerator::new(),
            state: CaptureState::Idle,
            frames_rejected: 0,
            cycle_failures: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Run until a budget signal or cancellation.
    pub fn run(mut self) -> CaptureReport {
        log::info!(
            "capture stage started (camera={}, quota={} bytes, {:.1}s left)",
            self.camera.name(),
            self.budget.quota_bytes(),
            self.budget.time_remaining()
        );
        let reason = loop {
            match self.cycle() {
                Cycle::Continue => {}
                Cycle::Retry(why) => {
                    self.cycle_failures += 1;
                    log::warn!("capture cycle failed: {}", why);
                }
                Cycle::Exit(reason) => break reason,
            }
        };
        self.transition(match reason {
            StopReason::StorageExhausted => CaptureState::Exhausted,
            StopReason::DeadlineExceeded => CaptureState::DeadlineExceeded,
            StopReason::Cancelled => CaptureState::Fatal,
        });

        let estimator = self.scheduler.estimator();
        log::info!(
            "capture stage finished ({}): {} items, {} bytes written, {} frames rejected, {} failed cycles",
            reason,
            estimator.count(),
            estimator.total_bytes(),
            self.frames_rejected,
            self.cycle_failures
        );
        CaptureReport {
            outcome: StageOutcome::Stopped(reason),
            items_committed: estimator.count(),
            bytes_written: estimator.total_bytes(),
            frames_rejected: self.frames_rejected,
            cycle_failures: self.cycle_failures,
        }
    }

    /// One pass through the state machine.
    pub fn cycle(&mut self) -> Cycle {
        if self.budget.token().is_cancelled() {
            return Cycle::Exit(StopReason::Cancelled);
        }
        if self.budget.time_remaining() <= 0.0 {
            return Cycle::Exit(StopReason::DeadlineExceeded);
        }
        match self.try_cycle() {
            Ok(cycle) => cycle,
            Err(e) => self.idle_one_unit(Cycle::Retry(format!("{:#}", e))),
        }
    }

    fn try_cycle(&mut self) -> Result<Cycle> {
        self.transition(CaptureState::WaitingForSpace);
        if let Err(reason) = self.scheduler.wait_for_space(&self.budget)? {
            return Ok(Cycle::Exit(reason));
        }

        self.transition(CaptureState::Capturing);
        let frame = match self.camera.capture() {
            Ok(frame) => raster::center_square(&frame),
            Err(e) => {
                log::warn!("camera '{}' failed to capture: {:#}", self.camera.name(), e);
                return Ok(self.idle_one_unit(Cycle::Retry(format!("capture failed: {:#}", e))));
            }
        };

        self.transition(CaptureState::Filtering);
        if let FrameVerdict::RejectLowLight { mean, peak } = self.filter.evaluate(&frame) {
            self.frames_rejected += 1;
            log::info!(
                "low-light frame rejected (mean={:.1}, peak={})",
                mean,
                peak
            );
            return Ok(self.idle_one_unit(Cycle::Continue));
        }

        self.transition(CaptureState::Committing);
        let bytes = raster::encode_jpeg(&frame, self.jpeg_quality)?;
        let size = self.commit(&bytes)?;
        self.scheduler.record_commit(size);

        if let Err(reason) = self.scheduler.wait_for_headroom(&self.budget)? {
            return Ok(Cycle::Exit(reason));
        }
        let delay = match self.scheduler.plan_delay(&self.budget)? {
            Ok(delay) => delay,
            Err(reason) => return Ok(Cycle::Exit(reason)),
        };

        self.transition(CaptureState::Idle);
        match self.scheduler.idle(&self.budget, delay) {
            Ok(()) => Ok(Cycle::Continue),
            Err(reason) => Ok(Cycle::Exit(reason)),
        }
    }

    /// Create a new Item and write its original. An Item whose original
    /// could not be written is discarded again.
    fn commit(&mut self, bytes: &[u8]) -> Result<u64> {
        let id = self.ids.next_id()?;
        self.store.create_item(&id)?;
        match self.store.write_original(&id, bytes) {
            Ok(size) => {
                log::info!("item {} committed ({} bytes)", id, size);
                Ok(size)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.remove_item(&id) {
                    log::warn!("could not discard uncommitted item {}: {:#}", id, cleanup);
                }
                Err(e.context(format!("failed to commit item {}", id)))
            }
        }
    }

    fn idle_one_unit(&mut self, then: Cycle) -> Cycle {
        self.transition(CaptureState::Idle);
        match self.scheduler.idle(&self.budget, self.scheduler.unit()) {
            Ok(()) => then,
            Err(reason) => Cycle::Exit(reason),
        }
    }

    fn transition(&mut self, next: CaptureState) {
        if self.state != next {
            log::debug!("capture: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
