use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::chain::WalletSource;
use crate::error::AppResult;
use crate::store::models::{now_millis, WalletInfo};

/// Payer wallet info at the time it was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerSnapshot {
    pub info: WalletInfo,
    pub fetched_at: i64,
}

/// Handle to the payer wallet's cached balance and nonce.
///
/// Snapshots are returned by value. When refreshes overlap, the snapshot with
/// the latest fetch time wins regardless of completion order.
#[derive(Clone)]
pub struct Payer {
    address: String,
    source: Arc<dyn WalletSource>,
    cached: Arc<RwLock<Option<PayerSnapshot>>>,
}

impl Payer {
    pub fn new(address: impl Into<String>, source: Arc<dyn WalletSource>) -> Self {
        Self {
            address: address.into(),
            source,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fetch fresh wallet info and store it
    pub async fn refresh(&self) -> AppResult<WalletInfo> {
        let fetched_at = now_millis();
        let info = self.source.info(&self.address).await?;
        debug!(address = %self.address, balance = info.balance, nonce = info.nonce, "refreshed payer");

        let snapshot = PayerSnapshot {
            info: info.clone(),
            fetched_at,
        };
        let mut cached = self.cached.write();
        match cached.as_ref() {
            Some(current) if current.fetched_at > fetched_at => {}
            _ => *cached = Some(snapshot),
        }
        Ok(info)
    }

    /// Cached wallet info, fetched on first use
    pub async fn get(&self) -> AppResult<WalletInfo> {
        let cached = self.cached.read().as_ref().map(|s| s.info.clone());
        match cached {
            Some(info) => Ok(info),
            None => self.refresh().await,
        }
    }
}
