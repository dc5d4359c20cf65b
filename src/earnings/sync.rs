use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::client::{FeedQuery, FeedSource};
use crate::error::{tally, AppResult};
use crate::store::models::EarningsPayment;
use crate::store::Store;

/// Only finalised oracle payments are lottery candidates
const CONFIRMED: &str = "confirmed";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub since: i64,
    pub fetched: usize,
    pub inserted: usize,
    pub errors: usize,
}

/// Indexes confirmed earnings payments from the earnings oracle.
///
/// Payments are taken from the oracle rather than directly from the
/// blockchain, which gives extra assurance they are legitimate candidates.
pub struct FeedIndexer {
    store: Arc<dyn Store>,
    feed: Arc<dyn FeedSource>,
    page_size: u64,
    start_time: i64,
}

impl FeedIndexer {
    pub fn new(store: Arc<dyn Store>, feed: Arc<dyn FeedSource>, page_size: u64, start_time: i64) -> Self {
        Self {
            store,
            feed,
            page_size: page_size.max(1),
            start_time,
        }
    }

    #[instrument(skip(self), name = "earnings:payment:sync")]
    pub async fn sync(&self) -> AppResult<IndexReport> {
        let since = match self.store.latest_payment().await? {
            Some(latest) => latest.timestamp,
            None => self.start_time,
        };

        let mut data: Vec<EarningsPayment> = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .feed
                .list(&FeedQuery {
                    status: CONFIRMED.to_string(),
                    limit: self.page_size,
                    offset,
                    since,
                })
                .await?;
            debug!(count = page.metadata.count, limit = self.page_size, offset, since, "fetched payments");

            let empty = page.results.is_empty();
            for payment in page.results {
                match payment.tx.into_payment() {
                    Some(p) => data.push(p),
                    None => warn!("skipped unsigned payment"),
                }
            }

            offset += self.page_size;
            if empty || offset >= page.metadata.total_count {
                break;
            }
        }

        let mut report = IndexReport {
            since,
            fetched: data.len(),
            ..Default::default()
        };
        if data.is_empty() {
            return Ok(report);
        }

        // `since` is inclusive so the latest indexed payment is always refetched
        let results = self.store.insert_payments(&data).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            warn!(%err, "failed to insert payment");
        }
        let (num, errors) = tally(&results);
        report.inserted = num;
        report.errors = errors;
        info!(since, num, errors, "synced payments");
        Ok(report)
    }
}
