use anyhow::Result;
use std::sync::Arc;

use crate::clock::RunToken;
use crate::store::ItemStore;

/// Run-wide time and storage budgets.
///
/// Nothing is cached: the clock and the store size both change underneath
/// us (the compression stage frees space concurrently), so every decision
/// point re-reads them.
#[derive(Clone)]
pub struct Budget {
    token: Arc<RunToken>,
    store: Arc<dyn ItemStore>,
    quota_bytes: u64,
}

impl Budget {
    pub fn new(token: Arc<RunToken>, store: Arc<dyn ItemStore>, quota_bytes: u64) -> Self {
        Self {
            token,
            store,
            quota_bytes,
        }
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Seconds until the deadline; negative once it has passed.
    pub fn time_remaining(&self) -> f64 {
        let remaining = self.token.time_remaining();
        log::debug!("time remaining: {:.3}s", remaining);
        remaining
    }

    /// Bytes left under the quota; negative once the quota is exceeded.
    pub fn space_remaining(&self) -> Result<i64> {
        let used = self.store.total_bytes()?;
        let remaining = i64::try_from(self.quota_bytes).unwrap_or(i64::MAX)
            - i64::try_from(used).unwrap_or(i64::MAX);
        log::debug!("space remaining in store: {} bytes", remaining);
        Ok(remaining)
    }
}
