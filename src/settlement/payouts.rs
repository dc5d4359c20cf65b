// Payout lifecycle jobs
//
// unsent -> pending     submit broadcasts a signed batch; a failed broadcast
//                       is held the same way until matched or expired
// pending -> processing the ledger synchronizer observes the payout on chain
// processing -> confirmed once its block is deep enough
// pending/processing -> unsent on rejection or expiry

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::chain::{Broadcaster, TxSigner};
use crate::error::{tally, AppError, AppResult};
use crate::payer::Payer;
use crate::store::models::{now_millis, Block, BlockTx, Payout, PayoutPatch, PayoutStatus, PayoutTx};
use crate::store::Store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub selected: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub matched: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfirmReport {
    pub confirmed: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Signs and broadcasts unsent payouts
pub struct PayoutSubmitter {
    store: Arc<dyn Store>,
    payer: Payer,
    signer: Arc<dyn TxSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    batch_size: u64,
    dry_run: bool,
}

impl PayoutSubmitter {
    pub fn new(
        store: Arc<dyn Store>,
        payer: Payer,
        signer: Arc<dyn TxSigner>,
        broadcaster: Arc<dyn Broadcaster>,
        batch_size: u64,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            payer,
            signer,
            broadcaster,
            batch_size,
            dry_run,
        }
    }

    #[instrument(skip(self), name = "payout:submit")]
    pub async fn submit(&self) -> AppResult<SubmitReport> {
        let Some(tip) = self.store.tip().await? else {
            error!("refusing to submit transactions without a tip block");
            return Ok(SubmitReport::default());
        };

        let payouts = self.store.unsent_payouts(self.batch_size).await?;
        if payouts.is_empty() {
            info!("no transactions");
            return Ok(SubmitReport::default());
        }
        info!(num = payouts.len(), "submitting transactions");

        // nonces are assigned sequentially from the wallet's next nonce
        let wallet = self.payer.refresh().await?;
        let now = now_millis();
        let mut signed: Vec<PayoutTx> = Vec::with_capacity(payouts.len());
        for (i, payout) in payouts.iter().enumerate() {
            let mut tx = payout.tx.clone();
            tx.nonce = wallet.nonce + i as u64;
            tx.sender = self.payer.address().to_string();
            tx.timestamp = now;
            signed.push(self.signer.sign(&tx)?);
        }

        if self.dry_run {
            warn!(num = signed.len(), txs = ?signed, "dry run: transactions not submitted");
            return Ok(SubmitReport {
                selected: payouts.len(),
                ..Default::default()
            });
        }

        let response = match self.broadcaster.submit(&signed).await {
            Ok(response) => response,
            Err(err) => {
                // the node may have accepted the batch before the failure
                error!(%err, num = signed.len(), "broadcast failed, holding transactions as in flight");
                self.hold_in_flight(&payouts, &signed, &tip, &err).await?;
                return Err(err);
            }
        };
        let meta = &response.metadata;
        if meta.rejected.unwrap_or(0) > 0 {
            let failed: Vec<&str> = response
                .results
                .iter()
                .filter(|r| !r.success)
                .filter_map(|r| r.transaction.data.reference.as_deref())
                .collect();
            error!(?meta, ?failed, "some transactions failed");
        } else if meta.ignored.unwrap_or(0) > 0 {
            error!(?meta, "some transactions were ignored");
        } else {
            info!(?meta, "submitted transactions");
        }

        let by_ref: HashMap<&str, (&Payout, &PayoutTx)> = payouts
            .iter()
            .zip(signed.iter())
            .map(|(p, tx)| (p.key.as_str(), (p, tx)))
            .collect();

        let mut report = SubmitReport {
            selected: payouts.len(),
            ..Default::default()
        };
        let mut updates = Vec::with_capacity(response.results.len());
        for result in &response.results {
            let Some((payout, tx)) = result
                .transaction
                .data
                .reference
                .as_deref()
                .and_then(|r| by_ref.get(r))
            else {
                warn!(hash = ?result.transaction.hash, "receipt for unknown transaction");
                continue;
            };

            let mut patch = PayoutPatch {
                tx: Some((*tx).clone()),
                attempts: Some(payout.attempts + 1),
                submit_block: Some(tip.clone()),
                ..PayoutPatch::new(&payout.key)
            };
            if result.success {
                report.accepted += 1;
                patch.status = Some(PayoutStatus::Pending);
                patch.last_response = Some(None);
            } else {
                report.rejected += 1;
                patch.status = Some(PayoutStatus::Unsent);
                patch.last_response = Some(result.reason.clone());
            }
            updates.push(patch);
        }

        let results = self.store.update_payouts(&updates).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(%err, "error saving payout");
        }
        let (num, errors) = tally(&results);
        report.errors = errors;
        info!(num, errors, "updated transaction statuses");
        Ok(report)
    }

    /// Record a batch with an unknown outcome as pending. Transactions that
    /// land are matched; the rest expire back to unsent after the grace period.
    async fn hold_in_flight(
        &self,
        payouts: &[Payout],
        signed: &[PayoutTx],
        tip: &Block,
        err: &AppError,
    ) -> AppResult<()> {
        let updates: Vec<PayoutPatch> = payouts
            .iter()
            .zip(signed.iter())
            .map(|(payout, tx)| PayoutPatch {
                tx: Some(tx.clone()),
                attempts: Some(payout.attempts + 1),
                submit_block: Some(tip.clone()),
                last_response: Some(Some(err.to_string())),
                ..PayoutPatch::new(&payout.key).status(PayoutStatus::Pending)
            })
            .collect();
        let results = self.store.update_payouts(&updates).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(%err, "error saving payout");
        }
        Ok(())
    }
}

/// Matches observed ledger transactions to payouts and confirms them
pub struct PayoutTracker {
    store: Arc<dyn Store>,
    payer_address: String,
    threshold: u64,
    grace_period: i64,
}

impl PayoutTracker {
    pub fn new(
        store: Arc<dyn Store>,
        payer_address: impl Into<String>,
        threshold: u64,
        grace_period: i64,
    ) -> Self {
        Self {
            store,
            payer_address: payer_address.into(),
            threshold,
            grace_period,
        }
    }

    /// Move pending payouts observed on chain to processing
    pub async fn match_transactions(&self, txs: &[BlockTx]) -> AppResult<MatchReport> {
        let mut observed: HashMap<&str, Vec<&BlockTx>> = HashMap::new();
        for btx in txs {
            if let Some(reference) = btx.tx.data.reference.as_deref() {
                observed.entry(reference).or_default().push(btx);
            }
        }
        if observed.is_empty() {
            return Ok(MatchReport::default());
        }

        let refs: Vec<String> = observed.keys().map(|r| r.to_string()).collect();
        let payouts = self.store.payouts_by_key(&refs).await?;
        if payouts.is_empty() {
            return Ok(MatchReport::default());
        }

        let mut report = MatchReport::default();
        let mut updates = Vec::new();
        for payout in &payouts {
            // an expired attempt and its resubmission can share a reference
            let Some(btx) = observed.get(payout.key.as_str()).and_then(|seen| {
                seen.iter()
                    .find(|b| b.tx.timestamp == payout.tx.timestamp)
                    .or(seen.last())
                    .copied()
            }) else {
                error!(reference = %payout.key, "unexpected missing tx");
                continue;
            };
            if btx.tx.sender != self.payer_address {
                debug!(hash = %btx.tx.hash, reference = %payout.key, "skipped transaction - incorrect sender");
                report.skipped += 1;
                continue;
            }
            if btx.tx.timestamp != payout.tx.timestamp {
                debug!(hash = %btx.tx.hash, reference = %payout.key, "skipped transaction - incorrect timestamp");
                report.skipped += 1;
                continue;
            }
            if !payout.status.can_transition_to(PayoutStatus::Processing) {
                warn!(
                    hash = %btx.tx.hash,
                    reference = %payout.key,
                    status = %payout.status,
                    "skipped transaction - payout not awaiting a block"
                );
                report.skipped += 1;
                continue;
            }

            updates.push(PayoutPatch {
                tx_hash: Some(btx.tx.hash.clone()),
                block: Some(btx.block.clone()),
                ..PayoutPatch::new(&payout.key).status(PayoutStatus::Processing)
            });
        }
        if updates.is_empty() {
            return Ok(report);
        }

        let results = self.store.update_payouts(&updates).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(%err, "failed to update payout");
        }
        let (num, errors) = tally(&results);
        report.matched = num;
        report.errors = errors;
        info!(num, errors, "updated payouts");
        Ok(report)
    }

    /// Confirm deep-enough payouts and expire stale ones
    #[instrument(skip(self), name = "payout:confirm")]
    pub async fn confirm(&self) -> AppResult<ConfirmReport> {
        let Some(tip) = self.store.tip().await? else {
            error!("unable to confirm transactions without a tip block");
            return Ok(ConfirmReport::default());
        };

        let threshold = tip.height.checked_sub(self.threshold);
        let payouts = self.store.confirmable_payouts(threshold).await?;
        if payouts.is_empty() {
            return Ok(ConfirmReport::default());
        }

        let now = now_millis();
        let mut report = ConfirmReport::default();
        let mut updates = Vec::new();
        for payout in &payouts {
            let matured = payout.status == PayoutStatus::Processing
                && matches!((&payout.block, threshold), (Some(b), Some(t)) if b.height <= t);

            if matured {
                report.confirmed += 1;
                updates.push(PayoutPatch::new(&payout.key).status(PayoutStatus::Confirmed));
            } else if now - payout.tx.timestamp > self.grace_period {
                report.expired += 1;
                updates.push(PayoutPatch::new(&payout.key).status(PayoutStatus::Unsent));
            }
        }
        if updates.is_empty() {
            return Ok(report);
        }

        let results = self.store.update_payouts(&updates).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(%err, "error saving payouts");
        }
        let (num, errors) = tally(&results);
        report.errors = errors;
        info!(num, errors, confirmed = report.confirmed, expired = report.expired, "updated payouts");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Ed25519Signer;
    use crate::store::MemoryStore;
    use crate::testing::{
        block_tx, seed_payout, MockBroadcaster, MockWalletSource, PAYER_SEED,
    };

    const GRACE: i64 = 900_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        broadcaster: Arc<MockBroadcaster>,
        signer: Arc<Ed25519Signer>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                broadcaster: Arc::new(MockBroadcaster::new()),
                signer: Arc::new(Ed25519Signer::from_hex(PAYER_SEED).unwrap()),
            }
        }

        fn payer_address(&self) -> String {
            self.signer.address().to_string()
        }

        fn submitter(&self, dry_run: bool) -> PayoutSubmitter {
            let payer = Payer::new(
                self.payer_address(),
                Arc::new(MockWalletSource::new(10_000, 40)),
            );
            PayoutSubmitter::new(
                self.store.clone(),
                payer,
                self.signer.clone(),
                self.broadcaster.clone(),
                50,
                dry_run,
            )
        }

        fn tracker(&self) -> PayoutTracker {
            PayoutTracker::new(self.store.clone(), self.payer_address(), 10, GRACE)
        }

        async fn tip(&self, height: u64) {
            self.store
                .upsert_blocks(&[Block {
                    hash: format!("tip{}", height),
                    height,
                }])
                .await
                .unwrap();
        }

        async fn payout(&self, key: &str) -> Payout {
            self.store.get_payout(key).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_submit_requires_tip() {
        let fx = Fixture::new();
        seed_payout(fx.store.as_ref(), "0a", 1).await;

        let report = fx.submitter(false).submit().await.unwrap();
        assert_eq!(report, SubmitReport::default());
        assert!(fx.broadcaster.submitted().is_empty());
        assert_eq!(fx.payout("0a").await.status, PayoutStatus::Unsent);
    }

    #[tokio::test]
    async fn test_submit_assigns_sequential_nonces_oldest_first() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0b", 2).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        seed_payout(fx.store.as_ref(), "0c", 1).await;
        fx.broadcaster.reject("0c", "insufficient balance");

        let report = fx.submitter(false).submit().await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);

        let sent = fx.broadcaster.submitted();
        let order: Vec<(&str, u64)> = sent
            .iter()
            .map(|tx| (tx.data.reference.as_str(), tx.nonce))
            .collect();
        assert_eq!(order, vec![("0a", 40), ("0c", 41), ("0b", 42)]);
        assert!(sent.iter().all(|tx| tx.signature.is_some() && tx.sender == fx.payer_address()));

        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Pending);
        assert_eq!(a.attempts, 1);
        assert_eq!(a.submit_block.unwrap().height, 100);
        assert!(a.last_response.is_none());

        let c = fx.payout("0c").await;
        assert_eq!(c.status, PayoutStatus::Unsent);
        assert_eq!(c.attempts, 1);
        assert_eq!(c.last_response.as_deref(), Some("insufficient balance"));
    }

    #[tokio::test]
    async fn test_failed_broadcast_is_held_in_flight() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        fx.broadcaster.set_unreachable(true);

        let err = fx.submitter(false).submit().await.unwrap_err();
        assert!(matches!(err, AppError::ExternalError(_)));

        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Pending);
        assert_eq!(a.attempts, 1);
        assert!(a.tx.signature.is_some());
        assert!(a.last_response.is_some());

        // not re-signed while the first attempt may still land
        fx.broadcaster.set_unreachable(false);
        let report = fx.submitter(false).submit().await.unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(fx.broadcaster.submitted().len(), 1);

        let block = Block { hash: "b101".into(), height: 101 };
        let report = fx
            .tracker()
            .match_transactions(&[block_tx(&a.tx, "f1", &block)])
            .await
            .unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(fx.payout("0a").await.status, PayoutStatus::Processing);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;

        let report = fx.submitter(true).submit().await.unwrap();
        assert_eq!(report.selected, 1);
        assert!(fx.broadcaster.submitted().is_empty());
        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Unsent);
        assert_eq!(a.attempts, 0);
    }

    #[tokio::test]
    async fn test_match_checks_sender_and_timestamp() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        seed_payout(fx.store.as_ref(), "0b", 2).await;
        seed_payout(fx.store.as_ref(), "0c", 3).await;
        fx.submitter(false).submit().await.unwrap();

        let a = fx.payout("0a").await;
        let b = fx.payout("0b").await;
        let c = fx.payout("0c").await;
        let block = Block {
            hash: "b101".into(),
            height: 101,
        };
        let txs = vec![
            block_tx(&a.tx, "f1", &block),
            block_tx(&PayoutTx { sender: "xe_other".into(), ..b.tx.clone() }, "f2", &block),
            block_tx(&PayoutTx { timestamp: c.tx.timestamp + 1, ..c.tx.clone() }, "f3", &block),
        ];

        let report = fx.tracker().match_transactions(&txs).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 2);

        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Processing);
        assert_eq!(a.block, Some(block));
        assert_eq!(a.tx.hash.as_deref(), Some("f1"));
        assert_eq!(fx.payout("0b").await.status, PayoutStatus::Pending);
        assert_eq!(fx.payout("0c").await.status, PayoutStatus::Pending);
    }

    #[tokio::test]
    async fn test_match_prefers_current_attempt() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        fx.submitter(false).submit().await.unwrap();

        let current = fx.payout("0a").await.tx;
        let expired = PayoutTx {
            timestamp: current.timestamp - GRACE - 1,
            nonce: current.nonce - 1,
            ..current.clone()
        };
        let block = Block { hash: "b101".into(), height: 101 };
        let txs = vec![
            block_tx(&current, "f-current", &block),
            block_tx(&expired, "f-expired", &block),
        ];

        let report = fx.tracker().match_transactions(&txs).await.unwrap();
        assert_eq!(report.matched, 1);
        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Processing);
        assert_eq!(a.tx.hash.as_deref(), Some("f-current"));
    }

    #[tokio::test]
    async fn test_confirm_only_past_threshold() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        seed_payout(fx.store.as_ref(), "0b", 2).await;
        fx.submitter(false).submit().await.unwrap();

        let a = fx.payout("0a").await;
        let b = fx.payout("0b").await;
        let txs = vec![
            block_tx(&a.tx, "f1", &Block { hash: "b101".into(), height: 101 }),
            block_tx(&b.tx, "f2", &Block { hash: "b105".into(), height: 105 }),
        ];
        fx.tracker().match_transactions(&txs).await.unwrap();

        fx.tip(111).await;
        let report = fx.tracker().confirm().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(fx.payout("0a").await.status, PayoutStatus::Confirmed);
        assert_eq!(fx.payout("0b").await.status, PayoutStatus::Processing);
    }

    #[tokio::test]
    async fn test_unmatched_pending_expires_to_unsent() {
        let fx = Fixture::new();
        fx.tip(100).await;
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        seed_payout(fx.store.as_ref(), "0b", 2).await;
        fx.submitter(false).submit().await.unwrap();

        // age one payout beyond the grace period
        let mut old = fx.payout("0a").await.tx;
        old.timestamp -= GRACE + 1;
        fx.store
            .update_payouts(&[PayoutPatch {
                tx: Some(old),
                ..PayoutPatch::new("0a")
            }])
            .await
            .unwrap();

        fx.tip(200).await;
        let report = fx.tracker().confirm().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.confirmed, 0);

        let a = fx.payout("0a").await;
        assert_eq!(a.status, PayoutStatus::Unsent);
        assert_eq!(a.attempts, 1);
        assert_eq!(fx.payout("0b").await.status, PayoutStatus::Pending);
    }

    #[tokio::test]
    async fn test_unsent_payout_is_not_matched() {
        let fx = Fixture::new();
        seed_payout(fx.store.as_ref(), "0a", 1).await;
        let mut tx = fx.payout("0a").await.tx;
        tx.sender = fx.payer_address();
        fx.store
            .update_payouts(&[PayoutPatch {
                tx: Some(tx.clone()),
                ..PayoutPatch::new("0a")
            }])
            .await
            .unwrap();

        let block = Block { hash: "b1".into(), height: 1 };
        let report = fx
            .tracker()
            .match_transactions(&[block_tx(&tx, "f1", &block)])
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.payout("0a").await.status, PayoutStatus::Unsent);
    }
}
