use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    api::AppState,
    chain::{Ed25519Signer, LedgerSynchronizer, TxSigner, XeClient},
    config::Config,
    draws::DrawConstructor,
    earnings::{EarningsClient, FeedIndexer},
    error::{AppError, AppResult},
    http::RequestOptions,
    payer::Payer,
    settlement::{PayoutReconciler, PayoutSubmitter, PayoutTracker, Workers},
    store::{MemoryStore, PgStore, Store},
};

/// Wire up the store, clients and settlement components
pub async fn initialize(config: &Config) -> AppResult<(AppState, Workers)> {
    info!("Initializing application components ...");

    let store = initialize_store(config).await?;

    let options = RequestOptions {
        timeout: config.request.timeout,
        headers: vec![],
        retries: config.request.retries,
    };
    let xe = Arc::new(XeClient::new(&config.blockchain.hosts, &options)?);
    info!("✅ Blockchain client initialized for {} ({})", xe.host(), config.network);
    let earnings = Arc::new(EarningsClient::new(&config.earnings.host, &options)?);
    info!("✅ Earnings client initialized for {}", config.earnings.host);

    let signer = initialize_signer(config)?;
    let payer_address = match (&signer, config.funds.payer_address.as_str()) {
        (Some(signer), "") => signer.address().to_string(),
        (Some(signer), address) if signer.address() != address => {
            return Err(AppError::Config(format!(
                "FUNDS_PAYER_ADDRESS {} does not match private key address {}",
                address,
                signer.address()
            )));
        }
        (_, address) => address.to_string(),
    };
    if payer_address.is_empty() {
        warn!("⚠️  No payer configured - payer info and draw funding checks will fail");
    }
    let payer = Payer::new(payer_address.clone(), xe.clone());

    let tracker = Arc::new(PayoutTracker::new(
        store.clone(),
        payer_address.clone(),
        config.payout.threshold,
        config.payout.grace_period.as_millis() as i64,
    ));
    let ledger = Arc::new(LedgerSynchronizer::new(
        store.clone(),
        xe.clone(),
        tracker.clone(),
        config.blockchain.batch_size,
        config.blockchain.page_size,
    ));
    let feed = Arc::new(FeedIndexer::new(
        store.clone(),
        earnings,
        config.earnings.page_size,
        config.start_time,
    ));
    let submitter = signer.map(|signer| {
        if config.payout.dry_run {
            warn!("⚠️  Payout submission is in dry run mode");
        }
        Arc::new(PayoutSubmitter::new(
            store.clone(),
            payer.clone(),
            signer,
            xe.clone(),
            config.payout.batch_size,
            config.payout.dry_run,
        ))
    });
    let reconciler = Arc::new(PayoutReconciler::new(
        store.clone(),
        payer_address,
        config.payout.reconcile_depth,
    ));

    let draws = Arc::new(DrawConstructor::new(
        store.clone(),
        payer.clone(),
        config.funds.distribution.clone(),
        config.start_time,
    ));
    info!(
        "🎟️ Draw distribution: {} winners, {} total",
        config.funds.distribution.len(),
        config.funds.distribution.iter().sum::<u64>()
    );

    let state = AppState { store, payer, draws };
    let workers = Workers {
        ledger,
        feed,
        tracker,
        submitter,
        reconciler,
    };
    Ok((state, workers))
}

async fn initialize_store(config: &Config) -> AppResult<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgStore::connect(url).await?)),
        None => {
            warn!("⚠️  DATABASE_URL not set - using in-memory store, data will not persist");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn initialize_signer(config: &Config) -> AppResult<Option<Arc<dyn TxSigner>>> {
    if config.funds.payer_private_key.is_empty() {
        warn!("⚠️  FUNDS_PAYER_PRIVATE_KEY not set - payout submission disabled");
        return Ok(None);
    }
    let signer = Ed25519Signer::from_hex(&config.funds.payer_private_key)?;
    info!("✅ Payer signer loaded for {}", signer.address());
    Ok(Some(Arc::new(signer)))
}
