use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::models::*;
use super::Store;
use crate::error::{AppResult, BatchResult, ItemError, StoreError};

/// In-memory document store.
///
/// Used when no database is configured, and by tests.
pub struct MemoryStore {
    blocks: RwLock<HashMap<String, Block>>,
    payments: RwLock<HashMap<String, EarningsPayment>>,
    draws: RwLock<HashMap<String, Draw>>,
    payouts: RwLock<HashMap<String, Payout>>,
    // keys whose writes fail as backend errors (fault injection)
    rejected: RwLock<HashSet<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            payments: RwLock::new(HashMap::new()),
            draws: RwLock::new(HashMap::new()),
            payouts: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
        }
    }

    /// Make every subsequent write to `key` fail
    #[cfg(test)]
    pub fn reject_writes(&self, key: &str) {
        self.rejected.write().insert(key.to_string());
    }

    fn check_rejected(&self, key: &str) -> Result<(), ItemError> {
        if self.rejected.read().contains(key) {
            return Err(ItemError::backend(key, "write rejected"));
        }
        Ok(())
    }

    fn paginate<T>(items: Vec<T>, skip: u64, limit: u64) -> Vec<T> {
        items
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect()
    }
}

fn compare_payments(
    a: &EarningsPayment,
    b: &EarningsPayment,
    sort: &[(PaymentSortField, SortDirection)],
) -> Ordering {
    for (field, direction) in sort {
        let ord = match field {
            PaymentSortField::Amount => a.amount.cmp(&b.amount),
            PaymentSortField::Hash => a.hash.cmp(&b.hash),
            PaymentSortField::Nonce => a.nonce.cmp(&b.nonce),
            PaymentSortField::Recipient => a.recipient.cmp(&b.recipient),
            PaymentSortField::Sender => a.sender.cmp(&b.sender),
            PaymentSortField::Signature => a.signature.cmp(&b.signature),
            PaymentSortField::Timestamp => a.timestamp.cmp(&b.timestamp),
        };
        let ord = match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Store for MemoryStore {
    // ========== BLOCKS ==========

    async fn tip(&self) -> AppResult<Option<Block>> {
        let blocks = self.blocks.read();
        Ok(blocks.values().max_by_key(|b| b.height).cloned())
    }

    async fn highest_block_among(&self, hashes: &[String]) -> AppResult<Option<Block>> {
        let blocks = self.blocks.read();
        Ok(hashes
            .iter()
            .filter_map(|h| blocks.get(h))
            .max_by_key(|b| b.height)
            .cloned())
    }

    async fn upsert_blocks(&self, blocks: &[Block]) -> AppResult<BatchResult<()>> {
        let mut stored = self.blocks.write();
        Ok(blocks
            .iter()
            .map(|b| {
                self.check_rejected(&b.hash)?;
                stored.insert(b.hash.clone(), b.clone());
                Ok(())
            })
            .collect())
    }

    async fn delete_blocks_above(&self, height: u64) -> AppResult<u64> {
        let mut blocks = self.blocks.write();
        let before = blocks.len();
        blocks.retain(|_, b| b.height <= height);
        Ok((before - blocks.len()) as u64)
    }

    async fn count_blocks(&self) -> AppResult<u64> {
        Ok(self.blocks.read().len() as u64)
    }

    // ========== EARNINGS PAYMENTS ==========

    async fn latest_payment(&self) -> AppResult<Option<EarningsPayment>> {
        let payments = self.payments.read();
        Ok(payments.values().max_by_key(|p| p.timestamp).cloned())
    }

    async fn insert_payments(&self, payments: &[EarningsPayment]) -> AppResult<BatchResult<()>> {
        let mut stored = self.payments.write();
        Ok(payments
            .iter()
            .map(|p| {
                self.check_rejected(&p.hash)?;
                if stored.contains_key(&p.hash) {
                    return Err(ItemError::conflict(&p.hash));
                }
                stored.insert(p.hash.clone(), p.clone());
                Ok(())
            })
            .collect())
    }

    async fn payments_by_hash(&self, hashes: &[String]) -> AppResult<Vec<EarningsPayment>> {
        let payments = self.payments.read();
        let unique: HashSet<&String> = hashes.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|h| payments.get(h).cloned())
            .collect())
    }

    async fn search_payments(&self, query: &PaymentQuery) -> AppResult<Page<EarningsPayment>> {
        let payments = self.payments.read();
        let mut found: Vec<EarningsPayment> =
            payments.values().filter(|p| query.matches(p)).cloned().collect();
        found.sort_by(|a, b| compare_payments(a, b, &query.sort));
        let total_count = found.len() as u64;
        Ok(Page {
            total_count,
            results: Self::paginate(found, query.skip, query.limit),
        })
    }

    async fn highest_payments(
        &self,
        since: i64,
        skip: u64,
        limit: u64,
    ) -> AppResult<Page<EarningsPayment>> {
        let payments = self.payments.read();
        let mut best: BTreeMap<&str, &EarningsPayment> = BTreeMap::new();
        for p in payments.values().filter(|p| p.timestamp >= since) {
            match best.get(p.recipient.as_str()) {
                Some(current) if current.hash <= p.hash => {}
                _ => {
                    best.insert(p.recipient.as_str(), p);
                }
            }
        }
        let mut ranked: Vec<EarningsPayment> = best.into_values().cloned().collect();
        ranked.sort_by(|a, b| a.hash.cmp(&b.hash));
        let total_count = ranked.len() as u64;
        Ok(Page {
            total_count,
            results: Self::paginate(ranked, skip, limit),
        })
    }

    // ========== DRAWS ==========

    async fn latest_draw(&self) -> AppResult<Option<Draw>> {
        let draws = self.draws.read();
        Ok(draws.values().max_by_key(|d| d.timestamp).cloned())
    }

    async fn insert_draw(&self, draw: &Draw) -> AppResult<()> {
        self.check_rejected(&draw.key)
            .map_err(|e| StoreError::Backend {
                key: e.key,
                detail: e.detail,
            })?;
        let mut draws = self.draws.write();
        if draws.contains_key(&draw.key) {
            return Err(StoreError::Conflict(draw.key.clone()).into());
        }
        draws.insert(draw.key.clone(), draw.clone());
        Ok(())
    }

    async fn get_draw(&self, key: &str) -> AppResult<Option<Draw>> {
        Ok(self.draws.read().get(key).cloned())
    }

    async fn search_draws(&self, query: &DrawQuery) -> AppResult<Page<Draw>> {
        let draws = self.draws.read();
        let mut found: Vec<Draw> = draws.values().filter(|d| query.matches(d)).cloned().collect();
        found.sort_by(|a, b| match query.direction {
            SortDirection::Asc => a.timestamp.cmp(&b.timestamp),
            SortDirection::Desc => b.timestamp.cmp(&a.timestamp),
        });
        let total_count = found.len() as u64;
        Ok(Page {
            total_count,
            results: Self::paginate(found, query.skip, query.limit),
        })
    }

    // ========== PAYOUTS ==========

    async fn get_payout(&self, key: &str) -> AppResult<Option<Payout>> {
        Ok(self.payouts.read().get(key).cloned())
    }

    async fn payouts_by_key(&self, keys: &[String]) -> AppResult<Vec<Payout>> {
        let payouts = self.payouts.read();
        let unique: HashSet<&String> = keys.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|k| payouts.get(k).cloned())
            .collect())
    }

    async fn payouts_for_draw(&self, draw: &str) -> AppResult<Vec<Payout>> {
        let payouts = self.payouts.read();
        let mut found: Vec<Payout> = payouts.values().filter(|p| p.draw == draw).cloned().collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn unsent_payouts(&self, limit: u64) -> AppResult<Vec<Payout>> {
        let payouts = self.payouts.read();
        let mut found: Vec<Payout> = payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Unsent)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.key.cmp(&b.key)));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn confirmable_payouts(&self, threshold: Option<u64>) -> AppResult<Vec<Payout>> {
        let payouts = self.payouts.read();
        let mut found: Vec<Payout> = payouts
            .values()
            .filter(|p| matches!(p.status, PayoutStatus::Pending | PayoutStatus::Processing))
            .filter(|p| match (&p.block, threshold) {
                (None, _) => true,
                (Some(block), Some(threshold)) => block.height <= threshold,
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn insert_payouts(&self, payouts: &[Payout]) -> AppResult<BatchResult<()>> {
        let mut stored = self.payouts.write();
        Ok(payouts
            .iter()
            .map(|p| {
                self.check_rejected(&p.key)?;
                if stored.contains_key(&p.key) {
                    return Err(ItemError::conflict(&p.key));
                }
                stored.insert(p.key.clone(), p.clone());
                Ok(())
            })
            .collect())
    }

    async fn update_payouts(&self, patches: &[PayoutPatch]) -> AppResult<BatchResult<()>> {
        let mut stored = self.payouts.write();
        Ok(patches
            .iter()
            .map(|patch| {
                self.check_rejected(&patch.key)?;
                let payout = stored
                    .get_mut(&patch.key)
                    .ok_or_else(|| ItemError::not_found(&patch.key))?;
                payout.apply(patch);
                Ok(())
            })
            .collect())
    }
}
