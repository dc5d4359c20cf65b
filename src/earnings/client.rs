use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::http::{JsonClient, RequestOptions};
use crate::store::models::{EarningsPayment, TxData};

/// Query parameters for the earnings oracle's payment list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub status: String,
    pub limit: u64,
    pub offset: u64,
    pub since: i64,
}

/// Transaction attached to an oracle payment. Hash and signature are only
/// present once the payment has been sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTx {
    #[serde(default)]
    pub hash: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub data: TxData,
    #[serde(default)]
    pub signature: Option<String>,
}

impl FeedTx {
    /// Indexable payment, if the transaction has been signed
    pub fn into_payment(self) -> Option<EarningsPayment> {
        Some(EarningsPayment {
            hash: self.hash?,
            signature: self.signature?,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            nonce: self.nonce,
            timestamp: self.timestamp,
            data: self.data,
        })
    }
}

impl From<EarningsPayment> for FeedTx {
    fn from(p: EarningsPayment) -> Self {
        Self {
            hash: Some(p.hash),
            sender: p.sender,
            recipient: p.recipient,
            amount: p.amount,
            nonce: p.nonce,
            timestamp: p.timestamp,
            data: p.data,
            signature: Some(p.signature),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPayment {
    pub tx: FeedTx,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetadata {
    pub count: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub results: Vec<FeedPayment>,
    pub metadata: FeedMetadata,
}

/// Source of confirmed earnings payments
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn list(&self, query: &FeedQuery) -> AppResult<FeedPage>;
}

/// Earnings oracle HTTP client
pub struct EarningsClient {
    http: JsonClient,
}

impl EarningsClient {
    pub fn new(host: &str, options: &RequestOptions) -> AppResult<Self> {
        Ok(Self {
            http: JsonClient::new(host, options)?,
        })
    }
}

#[async_trait]
impl FeedSource for EarningsClient {
    async fn list(&self, query: &FeedQuery) -> AppResult<FeedPage> {
        self.http
            .get_json(
                "/payments",
                &[
                    ("status", query.status.clone()),
                    ("limit", query.limit.to_string()),
                    ("offset", query.offset.to_string()),
                    ("since", query.since.to_string()),
                ],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_oracle_page() {
        let body = serde_json::json!({
            "results": [{
                "ref": "r1",
                "status": "confirmed",
                "attempts": 1,
                "tx": {
                    "hash": "0abc",
                    "sender": "xe_s",
                    "recipient": "xe_r",
                    "amount": 5,
                    "nonce": 2,
                    "timestamp": 1000,
                    "data": { "memo": "Earnings" },
                    "signature": "ff"
                }
            }],
            "metadata": { "count": 1, "limit": 100, "offset": 0, "totalCount": 1 }
        });
        let page: FeedPage = serde_json::from_value(body).unwrap();
        assert_eq!(page.metadata.total_count, 1);

        let payment = page.results[0].tx.clone().into_payment().unwrap();
        assert_eq!(payment.hash, "0abc");
        assert_eq!(payment.data.memo.as_deref(), Some("Earnings"));
    }

    #[test]
    fn test_unsigned_tx_is_not_indexable() {
        let tx = FeedTx {
            hash: None,
            sender: "xe_s".into(),
            recipient: "xe_r".into(),
            amount: 1,
            nonce: 0,
            timestamp: 0,
            data: TxData::default(),
            signature: None,
        };
        assert!(tx.into_payment().is_none());
    }
}
