use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Current wall-clock time as Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Block identifier on the XE blockchain.
///
/// Identity is the hash; heights strictly increase along the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
}

/// Free-form transaction data. Payout transactions carry `ref`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A signed transaction as it appears on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTx {
    pub hash: String,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub data: TxData,
    pub signature: String,
}

/// A ledger transaction together with the block that contains it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    pub tx: LedgerTx,
    pub block: Block,
}

/// Earnings payment indexed from the earnings oracle.
///
/// These are lottery candidates: each one is an on-chain transaction, keyed by its hash.
pub type EarningsPayment = LedgerTx;

/// Lottery winner, with reference to the winning transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub hash: String,
    pub recipient: String,
    pub amount: u64,
}

/// Leaderboard entry retained for audit purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub hash: String,
    pub recipient: String,
}

/// A draw represents a set of lottery winners at a given time.
///
/// `winners` is ordered by prize rank, `highest_hashes` is a leaderboard snapshot
/// taken at creation time, kept in case of dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draw {
    #[serde(rename = "_key")]
    pub key: String,
    pub timestamp: i64,
    pub winners: Vec<Winner>,
    pub highest_hashes: Vec<Candidate>,
}

/// Payout status in blockchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Unsent,
    Pending,
    Processing,
    Confirmed,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "unsent" => Ok(PayoutStatus::Unsent),
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "confirmed" => Ok(PayoutStatus::Confirmed),
            other => Err(AppError::Internal(format!("unknown payout status {}", other))),
        }
    }
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Unsent => "unsent",
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Confirmed => "confirmed",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// Self-transitions are allowed for `unsent` (failed resubmission) and
    /// `processing` (block refreshed after a reorg).
    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Unsent, Pending)
                | (Unsent, Unsent)
                | (Pending, Processing)
                | (Pending, Unsent)
                | (Processing, Processing)
                | (Processing, Confirmed)
                | (Processing, Unsent)
        )
    }
}

/// Payout transaction data. `ref` is the winning transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutData {
    #[serde(rename = "ref")]
    pub reference: String,
    pub memo: String,
}

/// Lottery payout transaction.
///
/// Unsigned until the submit job assigns a nonce and signs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTx {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: i64,
    pub data: PayoutData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl PayoutTx {
    /// Draft an unsigned payout for a winner
    pub fn unsigned(winner: &Winner, sender: &str, timestamp: i64, memo: String) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: winner.recipient.clone(),
            amount: winner.amount,
            nonce: 0,
            timestamp,
            data: PayoutData {
                reference: winner.hash.clone(),
                memo,
            },
            hash: None,
            signature: None,
        }
    }
}

/// Lottery payout.
///
/// The key is the winning transaction hash (`tx.data.ref`), which makes a second
/// payout for the same win impossible. The payout transaction's own hash is `tx.hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    #[serde(rename = "_key")]
    pub key: String,
    pub draw: String,
    pub status: PayoutStatus,
    pub tx: PayoutTx,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_block: Option<Block>,
    pub created: i64,
    pub updated: i64,
}

impl Payout {
    /// Create a new unsent payout for a draw
    pub fn unsent(draw: &str, tx: PayoutTx) -> Self {
        let now = now_millis();
        Self {
            key: tx.data.reference.clone(),
            draw: draw.to_string(),
            status: PayoutStatus::Unsent,
            tx,
            attempts: 0,
            last_response: None,
            block: None,
            submit_block: None,
            created: now,
            updated: now,
        }
    }

    /// Apply a patch in place, refreshing the updated timestamp
    pub fn apply(&mut self, patch: &PayoutPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(tx) = &patch.tx {
            self.tx = tx.clone();
        }
        if let Some(hash) = &patch.tx_hash {
            self.tx.hash = Some(hash.clone());
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(last_response) = &patch.last_response {
            self.last_response = last_response.clone();
        }
        if let Some(block) = &patch.block {
            self.block = Some(block.clone());
        }
        if let Some(block) = &patch.submit_block {
            self.submit_block = Some(block.clone());
        }
        self.updated = now_millis();
    }
}

/// Partial update of a payout. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutPatch {
    pub key: String,
    pub status: Option<PayoutStatus>,
    pub tx: Option<PayoutTx>,
    pub tx_hash: Option<String>,
    pub attempts: Option<u32>,
    pub last_response: Option<Option<String>>,
    pub block: Option<Block>,
    pub submit_block: Option<Block>,
}

impl PayoutPatch {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: PayoutStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Payer wallet information as reported by the blockchain.
///
/// `nonce` is the next nonce to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Sortable earnings payment fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSortField {
    Amount,
    Hash,
    Nonce,
    Recipient,
    Sender,
    Signature,
    Timestamp,
}

impl PaymentSortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "amount" => Some(PaymentSortField::Amount),
            "hash" => Some(PaymentSortField::Hash),
            "nonce" => Some(PaymentSortField::Nonce),
            "recipient" => Some(PaymentSortField::Recipient),
            "sender" => Some(PaymentSortField::Sender),
            "signature" => Some(PaymentSortField::Signature),
            "timestamp" => Some(PaymentSortField::Timestamp),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            PaymentSortField::Amount => "amount",
            PaymentSortField::Hash => "hash",
            PaymentSortField::Nonce => "nonce",
            PaymentSortField::Recipient => "recipient",
            PaymentSortField::Sender => "sender",
            PaymentSortField::Signature => "signature",
            PaymentSortField::Timestamp => "timestamp",
        }
    }
}

/// Search terms for earnings payments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQuery {
    pub recipients: Vec<String>,
    pub senders: Vec<String>,
    pub hashes: Vec<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub sort: Vec<(PaymentSortField, SortDirection)>,
    pub skip: u64,
    pub limit: u64,
}

impl Default for PaymentQuery {
    fn default() -> Self {
        Self {
            recipients: vec![],
            senders: vec![],
            hashes: vec![],
            since: None,
            until: None,
            sort: vec![(PaymentSortField::Hash, SortDirection::Asc)],
            skip: 0,
            limit: 10,
        }
    }
}

impl PaymentQuery {
    pub fn matches(&self, p: &EarningsPayment) -> bool {
        (self.recipients.is_empty() || self.recipients.contains(&p.recipient))
            && (self.senders.is_empty() || self.senders.contains(&p.sender))
            && (self.hashes.is_empty() || self.hashes.contains(&p.hash))
            && self.since.map_or(true, |since| p.timestamp >= since)
            && self.until.map_or(true, |until| p.timestamp < until)
    }
}

/// Search terms for draws
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub direction: SortDirection,
    pub skip: u64,
    pub limit: u64,
}

impl Default for DrawQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            direction: SortDirection::Desc,
            skip: 0,
            limit: 10,
        }
    }
}

impl DrawQuery {
    pub fn matches(&self, d: &Draw) -> bool {
        self.since.map_or(true, |since| d.timestamp >= since)
            && self.until.map_or(true, |until| d.timestamp < until)
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: u64,
    pub results: Vec<T>,
}
