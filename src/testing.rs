// Test fixtures and mock collaborators

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::chain::{
    BroadcastMetadata, BroadcastResponse, BroadcastResult, Broadcaster, LedgerBlock, LedgerSource,
    SubmittedTx, WalletSource,
};
use crate::earnings::{FeedMetadata, FeedPage, FeedPayment, FeedQuery, FeedSource};
use crate::error::{AppError, AppResult};
use crate::store::models::*;
use crate::store::Store;

pub const PAYER_SEED: &str = "4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb";

/// Deterministic valid XE address
pub fn address(n: u32) -> String {
    format!("xe_{:040x}", n)
}

pub fn payment(hash: &str, recipient: &str, timestamp: i64) -> EarningsPayment {
    EarningsPayment {
        hash: hash.to_string(),
        sender: address(999),
        recipient: recipient.to_string(),
        amount: 1_000,
        nonce: 1,
        timestamp,
        data: TxData {
            memo: Some("Earnings".to_string()),
            reference: None,
        },
        signature: "00".to_string(),
    }
}

/// Insert an unsent payout keyed by `key` with the given creation time
pub async fn seed_payout(store: &dyn Store, key: &str, created: i64) {
    let winner = Winner {
        hash: key.to_string(),
        recipient: address(1),
        amount: 100,
    };
    let mut payout = Payout::unsent(
        "draw",
        PayoutTx::unsigned(&winner, "", created, "Lottery Winnings January 2023".into()),
    );
    payout.created = created;
    let results = store.insert_payouts(&[payout]).await.unwrap();
    assert!(results[0].is_ok());
}

/// Ledger view of a payout transaction as included in `block`
pub fn block_tx(tx: &PayoutTx, hash: &str, block: &Block) -> BlockTx {
    BlockTx {
        tx: LedgerTx {
            hash: hash.to_string(),
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
            amount: tx.amount,
            nonce: tx.nonce,
            timestamp: tx.timestamp,
            data: TxData {
                memo: Some(tx.data.memo.clone()),
                reference: Some(tx.data.reference.clone()),
            },
            signature: tx.signature.clone().unwrap_or_default(),
        },
        block: block.clone(),
    }
}

/// Blocks `prefix{height}` for every height in `heights`
pub fn chain(prefix: &str, heights: std::ops::RangeInclusive<u64>) -> Vec<LedgerBlock> {
    heights
        .map(|height| LedgerBlock {
            hash: format!("{}{}", prefix, height),
            height,
            parent: None,
            transactions: vec![],
        })
        .collect()
}

// ========== LEDGER ==========

/// Canonical chain held in memory; replace it to simulate a reorg
#[derive(Default)]
pub struct MockLedger {
    chain: RwLock<Vec<LedgerBlock>>,
}

impl MockLedger {
    pub fn new(chain: Vec<LedgerBlock>) -> Self {
        Self {
            chain: RwLock::new(chain),
        }
    }

    pub fn replace(&self, chain: Vec<LedgerBlock>) {
        *self.chain.write() = chain;
    }
}

#[async_trait]
impl LedgerSource for MockLedger {
    async fn blocks(&self, from: u64, limit: u64) -> AppResult<Vec<LedgerBlock>> {
        let chain = self.chain.read();
        Ok(chain
            .iter()
            .filter(|b| b.height >= from)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ========== FEED ==========

#[derive(Default)]
pub struct MockFeed {
    payments: RwLock<Vec<EarningsPayment>>,
    calls: AtomicUsize,
}

impl MockFeed {
    pub fn new(payments: Vec<EarningsPayment>) -> Self {
        Self {
            payments: RwLock::new(payments),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, payment: EarningsPayment) {
        self.payments.write().push(payment);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn list(&self, query: &FeedQuery) -> AppResult<FeedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut matching: Vec<EarningsPayment> = self
            .payments
            .read()
            .iter()
            .filter(|p| p.timestamp >= query.since)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.timestamp);

        let total_count = matching.len() as u64;
        let results: Vec<FeedPayment> = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|tx| FeedPayment { tx: tx.into() })
            .collect();
        Ok(FeedPage {
            metadata: FeedMetadata {
                count: results.len() as u64,
                total_count,
            },
            results,
        })
    }
}

// ========== BROADCAST ==========

#[derive(Default)]
pub struct MockBroadcaster {
    submitted: RwLock<Vec<PayoutTx>>,
    rejections: RwLock<HashMap<String, String>>,
    /// Batches still reach the node but the response is lost
    unreachable: AtomicBool,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the transaction referencing `reference`
    pub fn reject(&self, reference: &str, reason: &str) {
        self.rejections
            .write()
            .insert(reference.to_string(), reason.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<PayoutTx> {
        self.submitted.read().clone()
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn submit(&self, txs: &[PayoutTx]) -> AppResult<BroadcastResponse> {
        self.submitted.write().extend(txs.iter().cloned());
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::ExternalError("operation timed out".to_string()));
        }
        let rejections = self.rejections.read();

        let results: Vec<BroadcastResult> = txs
            .iter()
            .map(|tx| {
                let reason = rejections.get(&tx.data.reference).cloned();
                BroadcastResult {
                    success: reason.is_none(),
                    transaction: SubmittedTx {
                        hash: tx.hash.clone(),
                        data: TxData {
                            memo: Some(tx.data.memo.clone()),
                            reference: Some(tx.data.reference.clone()),
                        },
                    },
                    reason,
                }
            })
            .collect();
        let rejected = results.iter().filter(|r| !r.success).count() as u64;

        Ok(BroadcastResponse {
            metadata: BroadcastMetadata {
                accepted: Some(results.len() as u64 - rejected),
                rejected: Some(rejected),
                ignored: None,
            },
            results,
        })
    }
}

// ========== WALLET ==========

pub struct MockWalletSource {
    balance: RwLock<(u64, u64)>,
    calls: AtomicUsize,
}

impl MockWalletSource {
    pub fn new(balance: u64, nonce: u64) -> Self {
        Self {
            balance: RwLock::new((balance, nonce)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, balance: u64, nonce: u64) {
        *self.balance.write() = (balance, nonce);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSource for MockWalletSource {
    async fn info(&self, address: &str) -> AppResult<WalletInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (balance, nonce) = *self.balance.read();
        Ok(WalletInfo {
            address: address.to_string(),
            balance,
            nonce,
        })
    }
}
