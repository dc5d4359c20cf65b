use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use super::{LedgerBlock, LedgerSource};
use crate::error::{AppError, AppResult, StoreError};
use crate::settlement::payouts::PayoutTracker;
use crate::store::models::{Block, BlockTx};
use crate::store::Store;

/// One page of new ledger history
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub blocks: Vec<Block>,
    pub transactions: Vec<BlockTx>,
    /// Anchor for the next page; `None` once caught up
    pub next: Option<Block>,
}

enum Fetched {
    Page(FetchResponse),
    RolledBack(Block),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub indexed: usize,
    pub matched: usize,
    pub rolled_back_to: Option<u64>,
}

/// Incrementally indexes ledger blocks, resolving reorgs against the local index
pub struct LedgerSynchronizer {
    store: Arc<dyn Store>,
    source: Arc<dyn LedgerSource>,
    tracker: Arc<PayoutTracker>,
    /// Maximum pages fetched per run
    batch_size: u64,
    page_size: u64,
}

impl LedgerSynchronizer {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn LedgerSource>,
        tracker: Arc<PayoutTracker>,
        batch_size: u64,
        page_size: u64,
    ) -> Self {
        Self {
            store,
            source,
            tracker,
            batch_size: batch_size.max(1),
            page_size: page_size.max(2),
        }
    }

    #[instrument(skip(self), name = "blocks:sync")]
    pub async fn sync(&self) -> AppResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut anchor = self.store.tip().await?;

        for _ in 0..self.batch_size {
            let page = match self.fetch(anchor.as_ref()).await? {
                Fetched::RolledBack(ancestor) => {
                    report.rolled_back_to = Some(ancestor.height);
                    anchor = Some(ancestor);
                    continue;
                }
                Fetched::Page(page) => page,
            };
            if page.blocks.is_empty() {
                info!("no new blocks");
                break;
            }

            let from = page.blocks.iter().map(|b| b.height).min().unwrap_or_default();
            let to = page.blocks.iter().map(|b| b.height).max().unwrap_or_default();
            info!(from, to, "fetched blocks");

            if !page.transactions.is_empty() {
                report.matched += self.tracker.match_transactions(&page.transactions).await?.matched;
            }

            // the page is complete only once every block is stored
            let results = self.store.upsert_blocks(&page.blocks).await?;
            if let Some(err) = results.into_iter().find_map(Result::err) {
                error!(%err, "failed to index block");
                return Err(AppError::Store(StoreError::from(err)));
            }
            report.indexed += page.blocks.len();

            match page.next {
                Some(next) => anchor = Some(next),
                None => break,
            }
        }

        info!(indexed = report.indexed, "done");
        Ok(report)
    }

    /// Fetch the page after `anchor`, rolling back first if `anchor` is no
    /// longer canonical
    async fn fetch(&self, anchor: Option<&Block>) -> AppResult<Fetched> {
        let from = anchor.map_or(0, |b| b.height);
        let mut remote = self.source.blocks(from, self.page_size).await?;
        let full = remote.len() as u64 >= self.page_size;

        if let Some(anchor) = anchor {
            if let Some(first) = remote.first() {
                if first.height == anchor.height && first.hash != anchor.hash {
                    let ancestor = self.rollback(anchor, first, &remote, from).await?;
                    return Ok(Fetched::RolledBack(ancestor));
                }
            }
            remote.retain(|b| b.height > anchor.height);
        }

        let blocks: Vec<Block> = remote.iter().map(LedgerBlock::id).collect();
        let transactions: Vec<BlockTx> = remote.iter().flat_map(LedgerBlock::payout_txs).collect();
        let next = if full { blocks.last().cloned() } else { None };

        Ok(Fetched::Page(FetchResponse {
            blocks,
            transactions,
            next,
        }))
    }

    /// Find the highest local block shared with the remote chain, paging back
    /// through remote history, and delete everything above it
    async fn rollback(
        &self,
        local: &Block,
        remote: &LedgerBlock,
        observed: &[LedgerBlock],
        from: u64,
    ) -> AppResult<Block> {
        info!(local = ?local, remote = %remote.hash, "starting rollback");

        let mut hashes: Vec<String> = observed.iter().map(|b| b.hash.clone()).collect();
        let mut from = from;
        let ancestor = loop {
            if let Some(found) = self.store.highest_block_among(&hashes).await? {
                break found;
            }
            if from == 0 {
                error!(local = ?local, remote = %remote.hash, "error finding common block");
                return Err(AppError::ChainDivergence(
                    "exhausted blockchain history".to_string(),
                ));
            }
            from = from.saturating_sub(self.page_size);
            let older = self.source.blocks(from, self.page_size).await?;
            if older.is_empty() {
                error!(local = ?local, from, "error finding common block");
                return Err(AppError::ChainDivergence(
                    "exhausted blockchain history".to_string(),
                ));
            }
            hashes = older.iter().map(|b| b.hash.clone()).collect();
        };
        debug!(ancestor = ?ancestor, "found common block");

        let removed = self.store.delete_blocks_above(ancestor.height).await?;
        info!(from = local.height, to = ancestor.height, removed, "completed rollback");
        Ok(ancestor)
    }
}
