use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::chain::signer::{validate_address, validate_hex};
use crate::error::{tally, AppError, AppResult};
use crate::payer::Payer;
use crate::store::models::{now_millis, Candidate, Draw, Payout, PayoutTx, Winner};
use crate::store::Store;

const WINNERS: &str = "draw.winners";

/// Winner as submitted by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct WinnerInput {
    #[validate(custom = "hex_hash")]
    pub hash: String,
    #[validate(custom = "xe_address")]
    pub recipient: String,
}

fn hex_hash(value: &str) -> Result<(), ValidationError> {
    if validate_hex(value) {
        return Ok(());
    }
    let mut err = ValidationError::new("hex");
    err.message = Some(format!("hex {} is not a valid hexadecimal string", value).into());
    Err(err)
}

fn xe_address(value: &str) -> Result<(), ValidationError> {
    if validate_address(value) {
        return Ok(());
    }
    let mut err = ValidationError::new("address");
    err.message = Some("recipient must be an XE address".into());
    Err(err)
}

/// First failure message, checking the hash before the recipient
fn first_reason(errors: &ValidationErrors) -> String {
    let fields = errors.field_errors();
    ["hash", "recipient"]
        .iter()
        .filter_map(|f| fields.get(f))
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "invalid winner".to_string())
}

/// Human-readable payout memo for a draw made at `timestamp`
pub fn winnings_memo(timestamp: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp).single() {
        Some(at) => format!("Lottery Winnings {}", at.format("%B %Y")),
        None => "Lottery Winnings".to_string(),
    }
}

/// Unsent payouts for every winner of a draw
pub fn draft_payouts(draw: &Draw, sender: &str) -> Vec<Payout> {
    let memo = winnings_memo(draw.timestamp);
    draw.winners
        .iter()
        .map(|w| Payout::unsent(&draw.key, PayoutTx::unsigned(w, sender, draw.timestamp, memo.clone())))
        .collect()
}

fn joined(hashes: &[&str]) -> String {
    hashes.join(", ")
}

/// A persisted draw with its payouts
#[derive(Debug, Clone)]
pub struct CreatedDraw {
    pub draw: Draw,
    pub payouts: Vec<Payout>,
}

/// Validates operator-submitted winners and creates draws with their payouts
pub struct DrawConstructor {
    store: Arc<dyn Store>,
    payer: Payer,
    distribution: Vec<u64>,
    start_time: i64,
}

impl DrawConstructor {
    pub fn new(store: Arc<dyn Store>, payer: Payer, distribution: Vec<u64>, start_time: i64) -> Self {
        Self {
            store,
            payer,
            distribution,
            start_time,
        }
    }

    pub fn distribution(&self) -> &[u64] {
        &self.distribution
    }

    /// Start of the current draw period: the last draw, or the start time
    pub async fn since(&self) -> AppResult<i64> {
        Ok(match self.store.latest_draw().await? {
            Some(last) => last.timestamp,
            None => self.start_time,
        })
    }

    pub async fn create(&self, winners: &[WinnerInput]) -> AppResult<CreatedDraw> {
        let since = self.since().await?;

        // input format
        for winner in winners {
            winner
                .validate()
                .map_err(|e| AppError::validation(WINNERS, first_reason(&e)))?;
        }
        if winners.len() != self.distribution.len() {
            return Err(AppError::validation(
                WINNERS,
                format!("must contain {} winners", self.distribution.len()),
            ));
        }

        // uniqueness
        let hashes: Vec<&str> = winners.iter().map(|w| w.hash.as_str()).collect();
        if hashes.iter().collect::<HashSet<_>>().len() != hashes.len() {
            return Err(AppError::validation(WINNERS, "duplicate hash"));
        }
        if winners.iter().map(|w| &w.recipient).collect::<HashSet<_>>().len() != winners.len() {
            return Err(AppError::validation(WINNERS, "duplicate recipient"));
        }

        // every winning transaction is indexed
        let owned: Vec<String> = hashes.iter().map(|h| h.to_string()).collect();
        let payments = self.store.payments_by_hash(&owned).await?;
        let found: HashMap<&str, _> = payments.iter().map(|p| (p.hash.as_str(), p)).collect();
        let missing: Vec<&str> = hashes.iter().copied().filter(|h| !found.contains_key(h)).collect();
        if !missing.is_empty() {
            return Err(AppError::validation(
                WINNERS,
                format!("transactions not found ({})", joined(&missing)),
            ));
        }

        // every winning transaction is in the current period
        let outdated: Vec<&str> = hashes
            .iter()
            .copied()
            .filter(|h| found.get(h).map_or(false, |p| p.timestamp < since))
            .collect();
        if !outdated.is_empty() {
            return Err(AppError::validation(
                WINNERS,
                format!("transactions too old ({})", joined(&outdated)),
            ));
        }

        // no winning transaction has been rewarded before
        let rewarded = self.store.payouts_by_key(&owned).await?;
        if !rewarded.is_empty() {
            let mut keys: Vec<&str> = rewarded.iter().map(|p| p.key.as_str()).collect();
            keys.sort_unstable();
            return Err(AppError::validation(
                "draw.winners.hash",
                format!("some transactions already rewarded ({})", joined(&keys)),
            ));
        }

        // winners are ranked by ascending hash and belong to their recipients
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        for (i, winner) in winners.iter().enumerate() {
            if hashes[i] != sorted[i] {
                return Err(AppError::validation(
                    WINNERS,
                    format!(
                        "incorrectly sorted transactions (got {}, expected {})",
                        hashes[i], sorted[i]
                    ),
                ));
            }
            if let Some(payment) = found.get(winner.hash.as_str()) {
                if payment.recipient != winner.recipient {
                    return Err(AppError::validation(
                        "draw.winners.recipient",
                        format!(
                            "incorrect recipient for transaction {} (got {}, expected {})",
                            winner.hash, winner.recipient, payment.recipient
                        ),
                    ));
                }
            }
        }

        // payer can cover the whole distribution
        let required: u64 = self.distribution.iter().sum();
        let wallet = self.payer.refresh().await?;
        if wallet.balance < required {
            return Err(AppError::InsufficientFunds {
                required,
                available: wallet.balance,
            });
        }

        // leaderboard snapshot, kept for reference in case of dispute
        let highest = self
            .store
            .highest_payments(since, 0, self.distribution.len() as u64)
            .await?;

        let draw = Draw {
            key: Uuid::new_v4().simple().to_string(),
            timestamp: now_millis(),
            winners: winners
                .iter()
                .zip(&self.distribution)
                .map(|(w, amount)| Winner {
                    hash: w.hash.clone(),
                    recipient: w.recipient.clone(),
                    amount: *amount,
                })
                .collect(),
            highest_hashes: highest
                .results
                .into_iter()
                .map(|p| Candidate {
                    hash: p.hash,
                    recipient: p.recipient,
                })
                .collect(),
        };
        self.store.insert_draw(&draw).await?;

        let payouts = draft_payouts(&draw, self.payer.address());
        let results = self.store.insert_payouts(&payouts).await?;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(draw = %draw.key, %err, "failed to insert payout");
        }
        let (num, errors) = tally(&results);
        if errors > 0 {
            return Err(AppError::Internal(format!(
                "failed to insert all payouts for draw {} ({} of {})",
                draw.key,
                errors,
                payouts.len()
            )));
        }

        info!(draw = %draw.key, winners = num, "🎟️ Draw created");
        Ok(CreatedDraw { draw, payouts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::PayoutStatus;
    use crate::store::MemoryStore;
    use crate::testing::{address, payment, seed_payout, MockWalletSource};

    const H1: &str = "00aa";
    const H2: &str = "00bb";

    struct Fixture {
        store: Arc<MemoryStore>,
        wallet: Arc<MockWalletSource>,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            store
                .insert_payments(&[payment(H1, &address(1), 100), payment(H2, &address(2), 110)])
                .await
                .unwrap();
            store
                .insert_draw(&Draw {
                    key: "prior".into(),
                    timestamp: 50,
                    winners: vec![],
                    highest_hashes: vec![],
                })
                .await
                .unwrap();
            Self {
                store,
                wallet: Arc::new(MockWalletSource::new(600, 0)),
            }
        }

        fn constructor(&self) -> DrawConstructor {
            let payer = Payer::new(address(100), self.wallet.clone());
            DrawConstructor::new(self.store.clone(), payer, vec![500, 100], 0)
        }
    }

    fn winner(hash: &str, recipient: &str) -> WinnerInput {
        WinnerInput {
            hash: hash.to_string(),
            recipient: recipient.to_string(),
        }
    }

    fn reason(err: AppError) -> (String, String) {
        match err {
            AppError::Validation { param, reason } => (param, reason),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_creates_draw_with_fixed_amounts() {
        let fx = Fixture::new().await;
        let created = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(2))])
            .await
            .unwrap();

        let amounts: Vec<(&str, u64)> = created
            .draw
            .winners
            .iter()
            .map(|w| (w.hash.as_str(), w.amount))
            .collect();
        assert_eq!(amounts, vec![(H1, 500), (H2, 100)]);
        assert_eq!(created.draw.highest_hashes.len(), 2);
        assert_eq!(created.draw.highest_hashes[0].hash, H1);

        for hash in [H1, H2] {
            let payout = fx.store.get_payout(hash).await.unwrap().unwrap();
            assert_eq!(payout.status, PayoutStatus::Unsent);
            assert_eq!(payout.draw, created.draw.key);
            assert_eq!(payout.tx.data.reference, hash);
            assert!(payout.tx.data.memo.starts_with("Lottery Winnings "));
        }
        assert_eq!(fx.store.latest_draw().await.unwrap().unwrap().key, created.draw.key);
    }

    #[tokio::test]
    async fn test_rejects_wrong_order() {
        let fx = Fixture::new().await;
        let err = fx
            .constructor()
            .create(&[winner(H2, &address(2)), winner(H1, &address(1))])
            .await
            .unwrap_err();
        assert_eq!(
            reason(err),
            (
                "draw.winners".to_string(),
                "incorrectly sorted transactions (got 00bb, expected 00aa)".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_rejects_already_rewarded() {
        let fx = Fixture::new().await;
        seed_payout(fx.store.as_ref(), H1, 1).await;

        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(2))])
            .await
            .unwrap_err();
        let (param, reason) = reason(err);
        assert_eq!(param, "draw.winners.hash");
        assert!(reason.contains(H1));
    }

    #[tokio::test]
    async fn test_rejects_duplicates() {
        let fx = Fixture::new().await;
        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(1))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).1, "duplicate recipient");

        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H1, &address(2))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).1, "duplicate hash");
    }

    #[tokio::test]
    async fn test_rejects_bad_format_missing_and_stale() {
        let fx = Fixture::new().await;

        let err = fx
            .constructor()
            .create(&[winner("xyz", &address(1)), winner(H2, &address(2))])
            .await
            .unwrap_err();
        assert!(reason(err).1.starts_with("hex"));

        let err = fx
            .constructor()
            .create(&[winner(H1, "not-an-address"), winner(H2, &address(2))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).1, "recipient must be an XE address");

        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner("00cc", &address(3))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).1, "transactions not found (00cc)");

        fx.store
            .insert_payments(&[payment("0001", &address(4), 40)])
            .await
            .unwrap();
        let err = fx
            .constructor()
            .create(&[winner("0001", &address(4)), winner(H1, &address(1))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).1, "transactions too old (0001)");
    }

    #[tokio::test]
    async fn test_rejects_redirected_recipient() {
        let fx = Fixture::new().await;
        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(3))])
            .await
            .unwrap_err();
        assert_eq!(reason(err).0, "draw.winners.recipient");
    }

    #[tokio::test]
    async fn test_rejects_underfunded_payer() {
        let fx = Fixture::new().await;
        fx.wallet.set(599, 0);
        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(2))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientFunds {
                required: 600,
                available: 599
            }
        ));
        assert!(fx.store.get_payout(H1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_payout_failure_keeps_draw() {
        let fx = Fixture::new().await;
        fx.store.reject_writes(H2);

        let err = fx
            .constructor()
            .create(&[winner(H1, &address(1)), winner(H2, &address(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let latest = fx.store.latest_draw().await.unwrap().unwrap();
        assert_ne!(latest.key, "prior");
        assert!(fx.store.get_payout(H1).await.unwrap().is_some());
        assert!(fx.store.get_payout(H2).await.unwrap().is_none());
    }

    #[test]
    fn test_memo_names_month() {
        // 2023-05-14T00:00:00Z
        assert_eq!(winnings_memo(1_684_022_400_000), "Lottery Winnings May 2023");
    }
}
