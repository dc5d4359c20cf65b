use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::draws::draft_payouts;
use crate::error::{AppResult, ItemErrorKind};
use crate::store::models::{DrawQuery, Payout, SortDirection};
use crate::store::Store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub draws: usize,
    pub repaired: usize,
    pub errors: usize,
}

/// Recreates payouts missing from recent draws, e.g. after a partial insert
/// failure during draw creation
pub struct PayoutReconciler {
    store: Arc<dyn Store>,
    sender: String,
    depth: u64,
}

impl PayoutReconciler {
    pub fn new(store: Arc<dyn Store>, sender: impl Into<String>, depth: u64) -> Self {
        Self {
            store,
            sender: sender.into(),
            depth: depth.max(1),
        }
    }

    #[instrument(skip(self), name = "payouts:reconcile")]
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let draws = self
            .store
            .search_draws(&DrawQuery {
                direction: SortDirection::Desc,
                limit: self.depth,
                ..Default::default()
            })
            .await?
            .results;

        let mut report = ReconcileReport {
            draws: draws.len(),
            ..Default::default()
        };

        for draw in &draws {
            let refs: Vec<String> = draw.winners.iter().map(|w| w.hash.clone()).collect();
            let existing: HashSet<String> = self
                .store
                .payouts_by_key(&refs)
                .await?
                .into_iter()
                .map(|p| p.key)
                .collect();

            let missing: Vec<Payout> = draft_payouts(draw, &self.sender)
                .into_iter()
                .filter(|p| !existing.contains(&p.key))
                .collect();
            if missing.is_empty() {
                continue;
            }

            for result in self.store.insert_payouts(&missing).await? {
                match result {
                    Ok(()) => report.repaired += 1,
                    Err(e) if e.kind == ItemErrorKind::Conflict => {}
                    Err(e) => {
                        warn!(draw = %draw.key, %e, "failed to repair payout");
                        report.errors += 1;
                    }
                }
            }
        }

        if report.repaired > 0 || report.errors > 0 {
            info!(num = report.repaired, errors = report.errors, "repaired payouts");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Draw, PayoutStatus, Winner};
    use crate::store::MemoryStore;
    use crate::testing::address;

    fn draw(key: &str, timestamp: i64, hashes: &[&str]) -> Draw {
        Draw {
            key: key.to_string(),
            timestamp,
            winners: hashes
                .iter()
                .enumerate()
                .map(|(i, h)| Winner {
                    hash: h.to_string(),
                    recipient: address(i as u32 + 1),
                    amount: 100,
                })
                .collect(),
            highest_hashes: vec![],
        }
    }

    #[tokio::test]
    async fn test_repairs_missing_payouts() {
        let store = Arc::new(MemoryStore::new());
        let d = draw("d1", 100, &["0a", "0b", "0c"]);
        store.insert_draw(&d).await.unwrap();
        let partial: Vec<Payout> = draft_payouts(&d, &address(100)).into_iter().take(1).collect();
        store.insert_payouts(&partial).await.unwrap();

        let reconciler = PayoutReconciler::new(store.clone(), address(100), 10);
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.repaired, 2);
        assert_eq!(report.errors, 0);

        let payouts = store.payouts_for_draw("d1").await.unwrap();
        assert_eq!(payouts.len(), 3);
        assert!(payouts.iter().all(|p| p.status == PayoutStatus::Unsent));

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn test_only_latest_draws_are_checked() {
        let store = Arc::new(MemoryStore::new());
        store.insert_draw(&draw("old", 100, &["01"])).await.unwrap();
        store.insert_draw(&draw("new", 200, &["02"])).await.unwrap();

        let report = PayoutReconciler::new(store.clone(), address(100), 1)
            .reconcile()
            .await
            .unwrap();
        assert_eq!(report.draws, 1);
        assert_eq!(report.repaired, 1);
        assert!(store.payouts_for_draw("old").await.unwrap().is_empty());
        assert_eq!(store.payouts_for_draw("new").await.unwrap().len(), 1);
    }
}
