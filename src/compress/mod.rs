//! Compression stage: the consumer side of the pipeline.
//!
//! Each sweep admits new items, then walks every non-terminal item oldest
//! first. Ready items get a cloud mask, the masked frame is written as the
//! derived artifact and the original is deleted to give the quota back.
//! A failing item is skipped for good so one bad frame cannot stall the
//! queue. The stage does not watch the storage quota: it only ever frees
//! space.

mod scanner;

use anyhow::Result;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;

pub use scanner::{Inspection, ItemClass, QueueScanner, ScanCounts};

use crate::clock::RunToken;
use crate::item::ItemId;
use crate::mask::{create_mask, MaskModel};
use crate::raster;
use crate::stage::{Cycle, StageOutcome, StopReason};
use crate::store::ItemStore;

/// Tunables for the compression stage.
#[derive(Clone, Debug)]
pub struct CompressionOptions {
    /// Sleep between sweeps that made no progress.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    /// Failed reads of a non-empty original before giving up on the item.
    pub decode_retry_limit: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            jpeg_quality: 90,
            decode_retry_limit: 30,
        }
    }
}

/// Summary of one compression stage run.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressionReport {
    pub outcome: StageOutcome,
    /// Items masked by this run.
    pub processed: u64,
    /// Items that already had a derived artifact.
    pub already_done: u64,
    /// Items given up on.
    pub skipped: u64,
}

impl CompressionReport {
    pub fn unavailable(why: String) -> Self {
        Self::without_work(StageOutcome::Unavailable(why))
    }

    pub fn crashed(why: String) -> Self {
        Self::without_work(StageOutcome::Crashed(why))
    }

    fn without_work(outcome: StageOutcome) -> Self {
        Self {
            outcome,
            processed: 0,
            already_done: 0,
            skipped: 0,
        }
    }
}

pub struct CompressionStage {
    model: Box<dyn MaskModel>,
    store: Arc<dyn ItemStore>,
    token: Arc<RunToken>,
    scanner: QueueScanner,
    options: CompressionOptions,
    processed: u64,
    already_done: u64,
    skipped: u64,
}

impl CompressionStage {
    pub fn new(
        model: Box<dyn MaskModel>,
        store: Arc<dyn ItemStore>,
        token: Arc<RunToken>,
        options: CompressionOptions,
    ) -> Self {
        Self {
            model,
            store,
            token,
            scanner: QueueScanner::new(options.decode_retry_limit),
            options,
            processed: 0,
            already_done: 0,
            skipped: 0,
        }
    }

    pub fn scanner(&self) -> &QueueScanner {
        &self.scanner
    }

    /// Run until the deadline or cancellation.
    pub fn run(mut self) -> CompressionReport {
        log::info!(
            "compression stage started (model={}, {:.1}s left)",
            self.model.name(),
            self.token.time_remaining()
        );
        let reason = loop {
            match self.sweep() {
                Cycle::Continue => {}
                Cycle::Retry(why) => {
                    log::warn!("compression sweep failed: {}", why);
                    self.token.sleep(self.options.poll_interval);
                }
                Cycle::Exit(reason) => break reason,
            }
        };
        log::info!(
            "compression stage finished ({}): {} items processed, {} already done, {} skipped",
            reason,
            self.processed,
            self.already_done,
            self.skipped
        );
        CompressionReport {
            outcome: StageOutcome::Stopped(reason),
            processed: self.processed,
            already_done: self.already_done,
            skipped: self.skipped,
        }
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.token.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.token.time_remaining() <= 0.0 {
            Some(StopReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// One pass over the scan set.
    pub fn sweep(&mut self) -> Cycle {
        if let Some(reason) = self.should_stop() {
            return Cycle::Exit(reason);
        }
        if let Err(e) = self.scanner.refresh(self.store.as_ref()) {
            return Cycle::Retry(format!("failed to list store: {:#}", e));
        }

        let mut progressed = false;
        for id in self.scanner.candidates() {
            if let Some(reason) = self.should_stop() {
                return Cycle::Exit(reason);
            }
            match self.scanner.inspect(self.store.as_ref(), &id) {
                Inspection::Pending => {}
                Inspection::Done => {
                    progressed = true;
                    self.already_done += 1;
                    log::info!("skipping item {}: derived artifact already exists", id);
                    self.reclaim_original(&id);
                }
                Inspection::Skipped => {
                    progressed = true;
                    self.skipped += 1;
                }
                Inspection::Ready(frame) => {
                    progressed = true;
                    self.handle_ready(&id, &frame);
                }
            }
        }

        if !progressed {
            self.token.sleep(self.options.poll_interval);
        }
        Cycle::Continue
    }

    fn handle_ready(&mut self, id: &ItemId, frame: &RgbImage) {
        log::info!("processing item {}", id);
        match self.process(id, frame) {
            Ok(bytes) => {
                self.scanner.mark_done(id);
                self.processed += 1;
                log::info!("item {} masked ({} bytes), original removed", id, bytes);
            }
            Err(e) => {
                self.scanner.mark_skipped(id);
                self.skipped += 1;
                log::error!("error while processing item {}: {:#}", id, e);
                log::info!("skipping item {}", id);
            }
        }
    }

    fn process(&mut self, id: &ItemId, frame: &RgbImage) -> Result<u64> {
        let mask = create_mask(self.model.as_mut(), frame)?;
        log::debug!("item {} cloud coverage {:.1}%", id, mask.coverage() * 100.0);
        let masked = raster::apply_mask(frame, &mask);
        let bytes = raster::encode_jpeg(&masked, self.options.jpeg_quality)?;
        let size = self.store.write_derived(id, &bytes)?;
        self.store.remove_original(id)?;
        Ok(size)
    }

    /// An interrupted run can leave an original next to its derived artifact.
    fn reclaim_original(&self, id: &ItemId) {
        match self.store.original_len(id) {
            Ok(Some(_)) => match self.store.remove_original(id) {
                Ok(()) => log::info!("removed leftover original of item {}", id),
                Err(e) => log::warn!("could not remove leftover original of {}: {:#}", id, e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("could not stat original of {}: {:#}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mask::BrightnessModel;
    use crate::store::InMemoryStore;
    use image::Rgb;

    fn id(n: u32) -> ItemId {
        ItemId::parse(&format!("2026-01-01_00-00-{:02}.000000", n)).unwrap()
    }

    fn commit(store: &InMemoryStore, n: u32) -> ItemId {
        let item = id(n);
        let frame = RgbImage::from_pixel(16, 16, Rgb([250, 250, 250]));
        store.create_item(&item).unwrap();
        store
            .write_original(&item, &raster::encode_jpeg(&frame, 90).unwrap())
            .unwrap();
        item
    }

    fn stage(store: Arc<InMemoryStore>) -> CompressionStage {
        let token = Arc::new(RunToken::new(
            Arc::new(ManualClock::new()),
            Duration::from_secs(30),
        ));
        CompressionStage::new(
            Box::new(BrightnessModel::new(8)),
            store,
            token,
            CompressionOptions::default(),
        )
    }

    #[test]
    fn ready_item_is_masked_and_original_removed() {
        let store = Arc::new(InMemoryStore::new());
        let a = commit(&store, 1);
        let newest = commit(&store, 2);

        let mut stage = stage(store.clone());
        assert_eq!(stage.sweep(), Cycle::Continue);

        assert_eq!(store.original_len(&a).unwrap(), None);
        assert!(store.derived_len(&a).unwrap().is_some());
        assert_eq!(stage.scanner().class_of(&a), Some(ItemClass::Done));
        // The newest item is left alone.
        assert!(store.original_len(&newest).unwrap().is_some());
        assert!(store.derived_len(&newest).unwrap().is_none());
    }

    #[test]
    fn leftover_original_next_to_derived_is_reclaimed() {
        let store = Arc::new(InMemoryStore::new());
        let a = commit(&store, 1);
        store.write_derived(&a, b"masked").unwrap();
        commit(&store, 2);

        let mut stage = stage(store.clone());
        stage.sweep();
        assert_eq!(store.original_len(&a).unwrap(), None);
        assert_eq!(store.derived_len(&a).unwrap(), Some(6));

        let report = stage.run();
        assert_eq!(report.already_done, 1);
        assert_eq!(report.processed, 0);
        assert_eq!(report.outcome, StageOutcome::Stopped(StopReason::DeadlineExceeded));
    }
}
