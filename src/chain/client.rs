use async_trait::async_trait;
use tracing::debug;

use super::{BroadcastResponse, Broadcaster, LedgerBlock, LedgerSource, WalletSource};
use crate::error::{AppError, AppResult};
use crate::http::{JsonClient, RequestOptions};
use crate::store::models::{PayoutTx, WalletInfo};

/// XE blockchain API client
pub struct XeClient {
    http: JsonClient,
}

impl XeClient {
    /// Build a client for the first non-empty host
    pub fn new(hosts: &[String], options: &RequestOptions) -> AppResult<Self> {
        let host = hosts
            .iter()
            .map(|h| h.trim())
            .find(|h| !h.is_empty())
            .ok_or_else(|| AppError::Config("no blockchain host configured".to_string()))?;

        Ok(Self {
            http: JsonClient::new(host, options)?,
        })
    }

    pub fn host(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait]
impl LedgerSource for XeClient {
    async fn blocks(&self, from: u64, limit: u64) -> AppResult<Vec<LedgerBlock>> {
        debug!(from, limit, "querying blockchain");
        self.http
            .get_json(
                "/blocks",
                &[("from", from.to_string()), ("limit", limit.to_string())],
            )
            .await
    }
}

#[async_trait]
impl Broadcaster for XeClient {
    async fn submit(&self, txs: &[PayoutTx]) -> AppResult<BroadcastResponse> {
        self.http.post_json("/transaction", txs).await
    }
}

#[async_trait]
impl WalletSource for XeClient {
    async fn info(&self, address: &str) -> AppResult<WalletInfo> {
        self.http
            .get_json(&format!("/wallet/{}", address), &[])
            .await
    }
}
