pub mod client;
pub mod signer;
pub mod sync;

pub use client::XeClient;
pub use signer::{Ed25519Signer, TxSigner};
pub use sync::LedgerSynchronizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::store::models::{Block, BlockTx, LedgerTx, PayoutTx, TxData, WalletInfo};

/// A block as served by the XE blockchain API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub transactions: Vec<LedgerTx>,
}

impl LedgerBlock {
    pub fn id(&self) -> Block {
        Block {
            hash: self.hash.clone(),
            height: self.height,
        }
    }

    /// Transactions in this block that reference a payout
    pub fn payout_txs(&self) -> impl Iterator<Item = BlockTx> + '_ {
        self.transactions
            .iter()
            .filter(|tx| tx.data.reference.is_some())
            .map(|tx| BlockTx {
                tx: tx.clone(),
                block: self.id(),
            })
    }
}

/// Transaction echoed back by the broadcast endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTx {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub data: TxData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub success: bool,
    pub transaction: SubmittedTx,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMetadata {
    #[serde(default)]
    pub accepted: Option<u64>,
    #[serde(default)]
    pub rejected: Option<u64>,
    #[serde(default)]
    pub ignored: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub results: Vec<BroadcastResult>,
    #[serde(default)]
    pub metadata: BroadcastMetadata,
}

/// Read access to canonical ledger history
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Up to `limit` blocks starting at height `from`, ascending
    async fn blocks(&self, from: u64, limit: u64) -> AppResult<Vec<LedgerBlock>>;
}

/// Transaction broadcast endpoint
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit(&self, txs: &[PayoutTx]) -> AppResult<BroadcastResponse>;
}

/// Wallet info endpoint
#[async_trait]
pub trait WalletSource: Send + Sync {
    /// Wallet balance and next nonce
    async fn info(&self, address: &str) -> AppResult<WalletInfo>;
}
