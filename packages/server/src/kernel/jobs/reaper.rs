//! Stale-job reaper.
//!
//! A worker that crashes (or is cancelled) mid-job leaves its claim in
//! `running` forever; the claim query never picks those up again. This loop
//! sweeps them back into the queue while attempts remain, and fails the
//! rest as abandoned. Safe to run in every worker process: the sweep is a
//! single guarded UPDATE.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::store::PgJobStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Reaper {
    store: Arc<PgJobStore>,
    stale_after: Duration,
}

impl Reaper {
    pub fn new(store: Arc<PgJobStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.store.requeue_stale(self.stale_after).await {
                Ok(outcome) => {
                    if !outcome.requeued.is_empty() || !outcome.abandoned.is_empty() {
                        info!(
                            requeued = outcome.requeued.len(),
                            abandoned = outcome.abandoned.len(),
                            "reaped stale jobs"
                        );
                    }
                }
                Err(err) => warn!(error = %err, "stale job sweep failed"),
            }
        }
    }
}
