// Background settlement work: ledger and feed indexing, payout lifecycle
pub mod payouts;
pub mod reconcile;
pub mod scheduler;

pub use payouts::{PayoutSubmitter, PayoutTracker};
pub use reconcile::PayoutReconciler;
pub use scheduler::{Job, SchedulerError};

use futures::FutureExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::chain::LedgerSynchronizer;
use crate::config::{Config, JobConfig};
use crate::earnings::FeedIndexer;

/// Payout jobs wait this long so the first ledger sync runs before them
const PAYOUT_DEFER: Duration = Duration::from_secs(5);

/// Components driven by the scheduler
pub struct Workers {
    pub ledger: Arc<LedgerSynchronizer>,
    pub feed: Arc<FeedIndexer>,
    pub tracker: Arc<PayoutTracker>,
    /// Absent when no payer key is configured
    pub submitter: Option<Arc<PayoutSubmitter>>,
    pub reconciler: Arc<PayoutReconciler>,
}

macro_rules! job {
    ($name:expr, $cfg:expr, $worker:expr, $method:ident) => {{
        let worker = $worker.clone();
        Job::new($name, $cfg.interval, move || {
            let worker = worker.clone();
            async move { worker.$method().await.map(|_| ()) }.boxed()
        })
    }};
}

fn enabled(name: &str, cfg: &JobConfig) -> bool {
    if !cfg.enabled {
        info!(job = name, "job disabled");
    }
    cfg.enabled
}

/// Build the enabled jobs
pub fn jobs(config: &Config, workers: &Workers) -> Vec<Job> {
    let mut jobs = Vec::new();

    if enabled("blocks:sync", &config.blockchain.sync) {
        jobs.push(job!("blocks:sync", config.blockchain.sync, workers.ledger, sync));
    }
    if enabled("earnings:payment:sync", &config.earnings.sync) {
        jobs.push(job!("earnings:payment:sync", config.earnings.sync, workers.feed, sync));
    }
    if enabled("payout:confirm", &config.payout.confirm) {
        jobs.push(job!("payout:confirm", config.payout.confirm, workers.tracker, confirm).defer(PAYOUT_DEFER));
    }
    if enabled("payout:submit", &config.payout.submit) {
        match &workers.submitter {
            Some(submitter) => {
                jobs.push(job!("payout:submit", config.payout.submit, submitter, submit).defer(PAYOUT_DEFER))
            }
            None => warn!(job = "payout:submit", "no payer private key, job disabled"),
        }
    }
    if enabled("payouts:reconcile", &config.payout.reconcile) {
        jobs.push(job!("payouts:reconcile", config.payout.reconcile, workers.reconciler, reconcile));
    }

    jobs
}
