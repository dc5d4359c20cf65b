pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{AppResult, BatchResult};
use async_trait::async_trait;
use models::*;

/// Document store for the four lottery collections.
///
/// Only per-document key uniqueness is relied upon; multi-document writes are
/// not atomic. Batch writes report one tagged result per input item.
#[async_trait]
pub trait Store: Send + Sync {
    // ========== BLOCKS ==========

    /// Highest-height indexed block
    async fn tip(&self) -> AppResult<Option<Block>>;

    /// Highest-height indexed block whose hash is one of `hashes`
    async fn highest_block_among(&self, hashes: &[String]) -> AppResult<Option<Block>>;

    /// Upsert blocks keyed by hash
    async fn upsert_blocks(&self, blocks: &[Block]) -> AppResult<BatchResult<()>>;

    /// Delete all blocks above a given height (exclusive of that height)
    async fn delete_blocks_above(&self, height: u64) -> AppResult<u64>;

    async fn count_blocks(&self) -> AppResult<u64>;

    // ========== EARNINGS PAYMENTS ==========

    /// Most recent payment by timestamp
    async fn latest_payment(&self) -> AppResult<Option<EarningsPayment>>;

    /// Insert payments keyed by hash; existing hashes are reported as conflicts
    async fn insert_payments(&self, payments: &[EarningsPayment]) -> AppResult<BatchResult<()>>;

    async fn payments_by_hash(&self, hashes: &[String]) -> AppResult<Vec<EarningsPayment>>;

    async fn search_payments(&self, query: &PaymentQuery) -> AppResult<Page<EarningsPayment>>;

    /// Leaderboard of payments since `since`: each recipient's lowest hash,
    /// ordered by ascending hash. `total_count` is the number of recipients.
    async fn highest_payments(&self, since: i64, skip: u64, limit: u64)
        -> AppResult<Page<EarningsPayment>>;

    // ========== DRAWS ==========

    /// Most recent draw by timestamp
    async fn latest_draw(&self) -> AppResult<Option<Draw>>;

    async fn insert_draw(&self, draw: &Draw) -> AppResult<()>;

    async fn get_draw(&self, key: &str) -> AppResult<Option<Draw>>;

    async fn search_draws(&self, query: &DrawQuery) -> AppResult<Page<Draw>>;

    // ========== PAYOUTS ==========

    async fn get_payout(&self, key: &str) -> AppResult<Option<Payout>>;

    async fn payouts_by_key(&self, keys: &[String]) -> AppResult<Vec<Payout>>;

    async fn payouts_for_draw(&self, draw: &str) -> AppResult<Vec<Payout>>;

    /// Unsent payouts, oldest created first with ties broken by key
    async fn unsent_payouts(&self, limit: u64) -> AppResult<Vec<Payout>>;

    /// Pending or processing payouts that either have no matched block or whose
    /// matched block is at or below `threshold`. A `None` threshold only
    /// matches payouts without a block.
    async fn confirmable_payouts(&self, threshold: Option<u64>) -> AppResult<Vec<Payout>>;

    /// Insert payouts keyed by winning hash; existing keys are reported as conflicts
    async fn insert_payouts(&self, payouts: &[Payout]) -> AppResult<BatchResult<()>>;

    /// Apply partial updates; missing keys are reported per item
    async fn update_payouts(&self, patches: &[PayoutPatch]) -> AppResult<BatchResult<()>>;
}
