//! Per-platform pacing and batch staggering.
//!
//! Due times come from two rules. A platform that succeeded recently may not
//! run again until `last_success + min_delay` (the floor). Anything not held
//! back by a floor gets a short startup grace instead, so fresh submissions
//! and cold restarts never fire the moment they land. Batches additionally
//! climb a stagger ladder so one submission burst spreads out over time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use clipcast_publish::Platform;

use crate::config::SchedulerConfig;
use crate::store::JobStore;
use crate::types::advance;

/// Computes when uploads may run. Reads the store's last-success cache and
/// mutates nothing.
#[derive(Clone)]
pub struct Pacer {
    store: Arc<JobStore>,
    config: SchedulerConfig,
}

impl Pacer {
    pub fn new(store: Arc<JobStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Earliest this platform may run again, derived from its most recent
    /// success. None when the platform has no successful history.
    pub async fn success_floor(&self, platform: &Platform) -> Option<DateTime<Utc>> {
        let last = self.store.last_success(platform).await?;
        Some(advance(last, self.config.min_delay_for(platform)))
    }

    /// Next eligible slot for a single submission measured from `from`: the
    /// floor when it is still ahead, otherwise `from` plus the startup grace.
    pub async fn next_slot(&self, platform: &Platform, from: DateTime<Utc>) -> DateTime<Utc> {
        match self.success_floor(platform).await {
            Some(floor) if floor > from => floor,
            _ => advance(from, self.config.startup_grace),
        }
    }

    /// Due times for a batch submitted together at `start`. Job `i` gets
    /// `max(its slot, anchor + i * stagger_delay)` with the ladder anchored
    /// at `start + startup_grace`, so an unconstrained batch comes out
    /// spaced exactly one stagger apart. With staggering disabled every job
    /// just gets its slot.
    pub async fn plan_batch(
        &self,
        platforms: &[Platform],
        start: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let anchor = advance(start, self.config.startup_grace);
        let mut due_times = Vec::with_capacity(platforms.len());
        for (index, platform) in platforms.iter().enumerate() {
            let slot = self.next_slot(platform, start).await;
            let due = if self.config.stagger_uploads {
                slot.max(advance(anchor, ladder(self.config.stagger_delay, index)))
            } else {
                slot
            };
            due_times.push(due);
        }
        due_times
    }
}

fn ladder(stagger: Duration, index: usize) -> Duration {
    u32::try_from(index)
        .ok()
        .and_then(|index| stagger.checked_mul(index))
        .unwrap_or(Duration::MAX)
}
