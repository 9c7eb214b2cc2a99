//! Capture-rate scheduling.
//!
//! The scheduler spreads the captures that still fit in the storage quota
//! evenly over the time left before the deadline. Both inputs drift (the
//! average item size changes, compression frees space) so the delay is
//! recomputed from scratch after every capture.

use anyhow::Result;
use std::time::Duration;

use crate::budget::Budget;
use crate::stage::{Decision, StopReason};

/// Running mean of committed item sizes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThroughputEstimator {
    total_bytes: u64,
    count: u64,
}

impl ThroughputEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, item_bytes: u64) {
        self.total_bytes += item_bytes;
        self.count += 1;
    }

    /// Average item size in bytes; `None` before the first commit.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.total_bytes as f64 / self.count as f64)
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Number of average-sized items that still fit. Negative space yields a
/// negative count.
pub fn items_remaining(space_remaining: i64, average_item_size: f64) -> i64 {
    (space_remaining as f64 / average_item_size).floor() as i64
}

/// Delay before the next capture.
///
/// `time_remaining` is in seconds and may be negative. The result is at
/// least `unit`, except that a delay longer than the time left collapses to
/// zero (fire now, there is nothing left to wait for).
pub fn next_delay(
    time_remaining: f64,
    space_remaining: i64,
    average_item_size: f64,
    unit: Duration,
) -> Decision<Duration> {
    let items = items_remaining(space_remaining, average_item_size);
    if items <= 0 {
        return Err(StopReason::StorageExhausted);
    }
    if time_remaining < 0.0 {
        return Err(StopReason::DeadlineExceeded);
    }

    let delay = (time_remaining / items as f64).max(unit.as_secs_f64());
    if delay > time_remaining {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_secs_f64(delay))
}

/// Owns the throughput estimate and performs the scheduler's waits.
pub struct CaptureScheduler {
    estimator: ThroughputEstimator,
    unit: Duration,
    space_wait_limit: Option<Duration>,
}

impl CaptureScheduler {
    pub fn new(unit: Duration) -> Self {
        Self {
            estimator: ThroughputEstimator::new(),
            unit,
            space_wait_limit: None,
        }
    }

    /// Bound the post-commit headroom wait. Exceeding it is treated as
    /// storage exhaustion.
    pub fn with_space_wait_limit(mut self, limit: Option<Duration>) -> Self {
        self.space_wait_limit = limit;
        self
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub fn estimator(&self) -> &ThroughputEstimator {
        &self.estimator
    }

    pub fn record_commit(&mut self, item_bytes: u64) {
        self.estimator.record(item_bytes);
        log::info!(
            "committed item of {} bytes (average now {:.1} bytes over {} items)",
            item_bytes,
            self.estimator.average().unwrap_or_default(),
            self.estimator.count()
        );
    }

    /// Block while the store is full, re-checking the deadline every poll.
    pub fn wait_for_space(&self, budget: &Budget) -> Result<Decision<()>> {
        loop {
            if budget.token().is_cancelled() {
                return Ok(Err(StopReason::Cancelled));
            }
            if budget.space_remaining()? > 0 {
                return Ok(Ok(()));
            }
            if budget.time_remaining() <= 0.0 {
                return Ok(Err(StopReason::DeadlineExceeded));
            }
            log::info!("waiting for store to have space");
            budget.token().sleep(self.unit);
        }
    }

    /// Block until one more average-sized item fits.
    pub fn wait_for_headroom(&self, budget: &Budget) -> Result<Decision<()>> {
        let Some(average) = self.estimator.average() else {
            return Ok(Ok(()));
        };
        let clock = budget.token().clock();
        let started = clock.elapsed();
        loop {
            if budget.token().is_cancelled() {
                return Ok(Err(StopReason::Cancelled));
            }
            if items_remaining(budget.space_remaining()?, average) >= 1 {
                return Ok(Ok(()));
            }
            if budget.time_remaining() <= 0.0 {
                return Ok(Err(StopReason::DeadlineExceeded));
            }
            if let Some(limit) = self.space_wait_limit {
                if clock.elapsed().saturating_sub(started) >= limit {
                    log::warn!(
                        "no headroom for a {:.0}-byte item after waiting {:?}",
                        average,
                        limit
                    );
                    return Ok(Err(StopReason::StorageExhausted));
                }
            }
            log::info!("waiting for store to have room for the next item");
            budget.token().sleep(self.unit);
        }
    }

    /// Compute the next inter-capture delay from fresh budget readings.
    pub fn plan_delay(&self, budget: &Budget) -> Result<Decision<Duration>> {
        let Some(average) = self.estimator.average() else {
            // No average yet: the first capture is unconditional.
            return Ok(Ok(Duration::ZERO));
        };
        let time_remaining = budget.time_remaining();
        let space_remaining = budget.space_remaining()?;
        let decision = next_delay(time_remaining, space_remaining, average, self.unit);
        match &decision {
            Ok(delay) => log::info!(
                "schedule: time_remaining={:.2}s space_remaining={}B items_remaining={} delay={:.2}s",
                time_remaining,
                space_remaining,
                items_remaining(space_remaining, average),
                delay.as_secs_f64()
            ),
            Err(reason) => log::warn!(
                "schedule: time_remaining={:.2}s space_remaining={}B -> {}",
                time_remaining,
                space_remaining,
                reason
            ),
        }
        Ok(decision)
    }

    /// Sleep for `delay` in unit-sized slices so cancellation is noticed.
    pub fn idle(&self, budget: &Budget, delay: Duration) -> Decision<()> {
        let clock = budget.token().clock();
        let until = clock.elapsed() + delay;
        loop {
            if budget.token().is_cancelled() {
                return Err(StopReason::Cancelled);
            }
            let now = clock.elapsed();
            if now >= until || budget.time_remaining() <= 0.0 {
                return Ok(());
            }
            budget.token().sleep((until - now).min(self.unit));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: Duration = Duration::from_secs(1);

    #[test]
    fn estimator_average_is_undefined_until_first_record() {
        let mut est = ThroughputEstimator::new();
        assert_eq!(est.average(), None);
        est.record(100);
        est.record(300);
        assert_eq!(est.average(), Some(200.0));
        assert_eq!(est.count(), 2);
        assert_eq!(est.total_bytes(), 400);
    }

    #[test]
    fn delay_spreads_remaining_items_over_remaining_time() {
        // 1000 bytes left, 100-byte items => 10 items over 100s.
        let delay = next_delay(100.0, 1000, 100.0, UNIT).unwrap();
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[test]
    fn delay_is_never_shorter_than_one_unit() {
        let delay = next_delay(10.0, 1_000_000, 1.0, UNIT).unwrap();
        assert_eq!(delay, UNIT);
    }

    #[test]
    fn delay_stays_within_unit_and_time_remaining() {
        for (time, space, avg) in [
            (3600.0, 50_000, 700.0),
            (5.0, 100, 99.0),
            (1.0, 1_000, 1.0),
            (86_400.0, 1, 1.0),
            (2.5, 7_777, 3.3),
        ] {
            let items = items_remaining(space, avg);
            assert!(items >= 1);
            let delay = next_delay(time, space, avg, UNIT).unwrap();
            assert!(delay >= UNIT, "{:?} below unit for {:?}", delay, (time, space, avg));
            assert!(delay.as_secs_f64() <= time);
        }
    }

    #[test]
    fn delay_longer_than_time_left_fires_immediately() {
        let delay = next_delay(0.5, 1000, 100.0, UNIT).unwrap();
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn no_whole_item_left_signals_storage_exhausted() {
        assert_eq!(
            next_delay(100.0, 99, 100.0, UNIT),
            Err(StopReason::StorageExhausted)
        );
        assert_eq!(
            next_delay(100.0, -50, 100.0, UNIT),
            Err(StopReason::StorageExhausted)
        );
        // Exactly one item fits.
        assert!(next_delay(100.0, 100, 100.0, UNIT).is_ok());
    }

    #[test]
    fn negative_time_signals_deadline_exceeded() {
        assert_eq!(
            next_delay(-1.0, 1000, 100.0, UNIT),
            Err(StopReason::DeadlineExceeded)
        );
    }

    #[test]
    fn full_store_blocks_capture_until_deadline() {
        use crate::clock::{Clock, ManualClock, RunToken};
        use crate::item::ItemId;
        use crate::store::{InMemoryStore, ItemStore};
        use std::sync::Arc;

        let clock = Arc::new(ManualClock::new());
        let token = Arc::new(RunToken::new(clock.clone(), Duration::from_secs(3)));
        let store = Arc::new(InMemoryStore::new());
        let id = ItemId::parse("2026-01-01_00-00-00.000000").unwrap();
        store.create_item(&id).unwrap();
        store.write_original(&id, &[0u8; 64]).unwrap();
        let budget = Budget::new(token, store, 64);

        let scheduler = CaptureScheduler::new(UNIT);
        assert_eq!(
            scheduler.wait_for_space(&budget).unwrap(),
            Err(StopReason::DeadlineExceeded)
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn storage_is_checked_before_deadline() {
        assert_eq!(
            next_delay(-1.0, 0, 100.0, UNIT),
            Err(StopReason::StorageExhausted)
        );
    }
}
