use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;

use super::models::*;
use super::Store;
use crate::error::{AppError, AppResult, BatchResult, ItemError, StoreError};

const PAYMENT_COLUMNS: &str = "hash, sender, recipient, amount, nonce, timestamp, data, signature";

const PAYOUT_COLUMNS: &str = "key, draw, status, tx, attempts, last_response, block_hash, \
     block_height, submit_block_hash, submit_block_height, created, updated";

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[derive(FromRow)]
struct BlockRow {
    hash: String,
    height: i64,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Block {
            hash: row.hash,
            height: to_u64(row.height),
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    hash: String,
    sender: String,
    recipient: String,
    amount: i64,
    nonce: i64,
    timestamp: i64,
    data: Json<TxData>,
    signature: String,
}

impl From<PaymentRow> for EarningsPayment {
    fn from(row: PaymentRow) -> Self {
        EarningsPayment {
            hash: row.hash,
            sender: row.sender,
            recipient: row.recipient,
            amount: to_u64(row.amount),
            nonce: to_u64(row.nonce),
            timestamp: row.timestamp,
            data: row.data.0,
            signature: row.signature,
        }
    }
}

#[derive(FromRow)]
struct DrawRow {
    key: String,
    timestamp: i64,
    winners: Json<Vec<Winner>>,
    highest_hashes: Json<Vec<Candidate>>,
}

impl From<DrawRow> for Draw {
    fn from(row: DrawRow) -> Self {
        Draw {
            key: row.key,
            timestamp: row.timestamp,
            winners: row.winners.0,
            highest_hashes: row.highest_hashes.0,
        }
    }
}

#[derive(FromRow)]
struct PayoutRow {
    key: String,
    draw: String,
    status: String,
    tx: Json<PayoutTx>,
    attempts: i32,
    last_response: Option<String>,
    block_hash: Option<String>,
    block_height: Option<i64>,
    submit_block_hash: Option<String>,
    submit_block_height: Option<i64>,
    created: i64,
    updated: i64,
}

fn block_of(hash: Option<String>, height: Option<i64>) -> Option<Block> {
    match (hash, height) {
        (Some(hash), Some(height)) => Some(Block {
            hash,
            height: to_u64(height),
        }),
        _ => None,
    }
}

impl TryFrom<PayoutRow> for Payout {
    type Error = AppError;

    fn try_from(row: PayoutRow) -> AppResult<Self> {
        Ok(Payout {
            status: row.status.parse()?,
            key: row.key,
            draw: row.draw,
            tx: row.tx.0,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_response: row.last_response,
            block: block_of(row.block_hash, row.block_height),
            submit_block: block_of(row.submit_block_hash, row.submit_block_height),
            created: row.created,
            updated: row.updated,
        })
    }
}

fn payouts_from(rows: Vec<PayoutRow>) -> AppResult<Vec<Payout>> {
    rows.into_iter().map(Payout::try_from).collect()
}

fn push_payment_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &PaymentQuery) {
    qb.push(" WHERE TRUE");
    if !query.recipients.is_empty() {
        qb.push(" AND recipient = ANY(")
            .push_bind(query.recipients.clone())
            .push(")");
    }
    if !query.senders.is_empty() {
        qb.push(" AND sender = ANY(")
            .push_bind(query.senders.clone())
            .push(")");
    }
    if !query.hashes.is_empty() {
        qb.push(" AND hash = ANY(")
            .push_bind(query.hashes.clone())
            .push(")");
    }
    if let Some(since) = query.since {
        qb.push(" AND timestamp >= ").push_bind(since);
    }
    if let Some(until) = query.until {
        qb.push(" AND timestamp < ").push_bind(until);
    }
}

fn push_draw_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &DrawQuery) {
    qb.push(" WHERE TRUE");
    if let Some(since) = query.since {
        qb.push(" AND timestamp >= ").push_bind(since);
    }
    if let Some(until) = query.until {
        qb.push(" AND timestamp < ").push_bind(until);
    }
}

/// Postgres-backed store
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, configure the pool and run migrations
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        info!("📊 Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("🔄 Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("✓ Database initialized");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for PgStore {
    // ========== BLOCKS ==========

    async fn tip(&self) -> AppResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT hash, height FROM blocks ORDER BY height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Block::from))
    }

    async fn highest_block_among(&self, hashes: &[String]) -> AppResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT hash, height FROM blocks WHERE hash = ANY($1) ORDER BY height DESC LIMIT 1",
        )
        .bind(hashes.to_vec())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Block::from))
    }

    async fn upsert_blocks(&self, blocks: &[Block]) -> AppResult<BatchResult<()>> {
        let mut results = Vec::with_capacity(blocks.len());
        for block in blocks {
            let result = sqlx::query(
                r#"
                INSERT INTO blocks (hash, height) VALUES ($1, $2)
                ON CONFLICT (hash) DO UPDATE SET height = EXCLUDED.height
                "#,
            )
            .bind(&block.hash)
            .bind(to_i64(block.height))
            .execute(&self.pool)
            .await;
            results.push(
                result
                    .map(|_| ())
                    .map_err(|e| ItemError::backend(&block.hash, e)),
            );
        }
        Ok(results)
    }

    async fn delete_blocks_above(&self, height: u64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM blocks WHERE height > $1")
            .bind(to_i64(height))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_blocks(&self) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(to_u64(count))
    }

    // ========== EARNINGS PAYMENTS ==========

    async fn latest_payment(&self) -> AppResult<Option<EarningsPayment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM earnings_payments ORDER BY timestamp DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EarningsPayment::from))
    }

    async fn insert_payments(&self, payments: &[EarningsPayment]) -> AppResult<BatchResult<()>> {
        let mut results = Vec::with_capacity(payments.len());
        for p in payments {
            let result = sqlx::query(
                r#"
                INSERT INTO earnings_payments
                    (hash, sender, recipient, amount, nonce, timestamp, data, signature)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (hash) DO NOTHING
                "#,
            )
            .bind(&p.hash)
            .bind(&p.sender)
            .bind(&p.recipient)
            .bind(to_i64(p.amount))
            .bind(to_i64(p.nonce))
            .bind(p.timestamp)
            .bind(Json(&p.data))
            .bind(&p.signature)
            .execute(&self.pool)
            .await;
            results.push(match result {
                Ok(r) if r.rows_affected() == 0 => Err(ItemError::conflict(&p.hash)),
                Ok(_) => Ok(()),
                Err(e) => Err(ItemError::backend(&p.hash, e)),
            });
        }
        Ok(results)
    }

    async fn payments_by_hash(&self, hashes: &[String]) -> AppResult<Vec<EarningsPayment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM earnings_payments WHERE hash = ANY($1)",
            PAYMENT_COLUMNS
        ))
        .bind(hashes.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EarningsPayment::from).collect())
    }

    async fn search_payments(&self, query: &PaymentQuery) -> AppResult<Page<EarningsPayment>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM earnings_payments");
        push_payment_filters(&mut count, query);
        let (total_count,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM earnings_payments",
            PAYMENT_COLUMNS
        ));
        push_payment_filters(&mut qb, query);
        if !query.sort.is_empty() {
            qb.push(" ORDER BY ");
            let mut order = qb.separated(", ");
            for (field, direction) in &query.sort {
                let collate = match field {
                    PaymentSortField::Hash => " COLLATE \"C\"",
                    _ => "",
                };
                order.push(format!("{}{} {}", field.column(), collate, direction.as_sql()));
            }
        }
        qb.push(" OFFSET ")
            .push_bind(to_i64(query.skip))
            .push(" LIMIT ")
            .push_bind(to_i64(query.limit));

        let rows: Vec<PaymentRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            total_count: to_u64(total_count),
            results: rows.into_iter().map(EarningsPayment::from).collect(),
        })
    }

    async fn highest_payments(
        &self,
        since: i64,
        skip: u64,
        limit: u64,
    ) -> AppResult<Page<EarningsPayment>> {
        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT recipient) FROM earnings_payments WHERE timestamp >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {cols} FROM (
                SELECT DISTINCT ON (recipient) {cols}
                FROM earnings_payments
                WHERE timestamp >= $1
                ORDER BY recipient, hash COLLATE "C" ASC
            ) best
            ORDER BY hash COLLATE "C" ASC
            OFFSET $2 LIMIT $3
            "#,
            cols = PAYMENT_COLUMNS
        ))
        .bind(since)
        .bind(to_i64(skip))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            total_count: to_u64(total_count),
            results: rows.into_iter().map(EarningsPayment::from).collect(),
        })
    }

    // ========== DRAWS ==========

    async fn latest_draw(&self) -> AppResult<Option<Draw>> {
        let row = sqlx::query_as::<_, DrawRow>(
            "SELECT key, timestamp, winners, highest_hashes FROM draws ORDER BY timestamp DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Draw::from))
    }

    async fn insert_draw(&self, draw: &Draw) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO draws (key, timestamp, winners, highest_hashes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&draw.key)
        .bind(draw.timestamp)
        .bind(Json(&draw.winners))
        .bind(Json(&draw.highest_hashes))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(draw.key.clone()).into());
        }
        Ok(())
    }

    async fn get_draw(&self, key: &str) -> AppResult<Option<Draw>> {
        let row = sqlx::query_as::<_, DrawRow>(
            "SELECT key, timestamp, winners, highest_hashes FROM draws WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Draw::from))
    }

    async fn search_draws(&self, query: &DrawQuery) -> AppResult<Page<Draw>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM draws");
        push_draw_filters(&mut count, query);
        let (total_count,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT key, timestamp, winners, highest_hashes FROM draws",
        );
        push_draw_filters(&mut qb, query);
        qb.push(format!(" ORDER BY timestamp {}", query.direction.as_sql()))
            .push(" OFFSET ")
            .push_bind(to_i64(query.skip))
            .push(" LIMIT ")
            .push_bind(to_i64(query.limit));

        let rows: Vec<DrawRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            total_count: to_u64(total_count),
            results: rows.into_iter().map(Draw::from).collect(),
        })
    }

    // ========== PAYOUTS ==========

    async fn get_payout(&self, key: &str) -> AppResult<Option<Payout>> {
        let row = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payouts WHERE key = $1",
            PAYOUT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Payout::try_from).transpose()
    }

    async fn payouts_by_key(&self, keys: &[String]) -> AppResult<Vec<Payout>> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payouts WHERE key = ANY($1)",
            PAYOUT_COLUMNS
        ))
        .bind(keys.to_vec())
        .fetch_all(&self.pool)
        .await?;
        payouts_from(rows)
    }

    async fn payouts_for_draw(&self, draw: &str) -> AppResult<Vec<Payout>> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payouts WHERE draw = $1 ORDER BY key",
            PAYOUT_COLUMNS
        ))
        .bind(draw)
        .fetch_all(&self.pool)
        .await?;
        payouts_from(rows)
    }

    async fn unsent_payouts(&self, limit: u64) -> AppResult<Vec<Payout>> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payouts WHERE status = 'unsent' ORDER BY created ASC, key ASC LIMIT $1",
            PAYOUT_COLUMNS
        ))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        payouts_from(rows)
    }

    async fn confirmable_payouts(&self, threshold: Option<u64>) -> AppResult<Vec<Payout>> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            r#"
            SELECT {} FROM payouts
            WHERE status IN ('pending', 'processing')
              AND (block_height IS NULL OR block_height <= $1)
            ORDER BY key
            "#,
            PAYOUT_COLUMNS
        ))
        .bind(threshold.map(to_i64))
        .fetch_all(&self.pool)
        .await?;
        payouts_from(rows)
    }

    async fn insert_payouts(&self, payouts: &[Payout]) -> AppResult<BatchResult<()>> {
        let mut results = Vec::with_capacity(payouts.len());
        for p in payouts {
            let result = sqlx::query(&format!(
                r#"
                INSERT INTO payouts ({})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (key) DO NOTHING
                "#,
                PAYOUT_COLUMNS
            ))
            .bind(&p.key)
            .bind(&p.draw)
            .bind(p.status.as_str())
            .bind(Json(&p.tx))
            .bind(i32::try_from(p.attempts).unwrap_or(i32::MAX))
            .bind(&p.last_response)
            .bind(p.block.as_ref().map(|b| b.hash.clone()))
            .bind(p.block.as_ref().map(|b| to_i64(b.height)))
            .bind(p.submit_block.as_ref().map(|b| b.hash.clone()))
            .bind(p.submit_block.as_ref().map(|b| to_i64(b.height)))
            .bind(p.created)
            .bind(p.updated)
            .execute(&self.pool)
            .await;
            results.push(match result {
                Ok(r) if r.rows_affected() == 0 => Err(ItemError::conflict(&p.key)),
                Ok(_) => Ok(()),
                Err(e) => Err(ItemError::backend(&p.key, e)),
            });
        }
        Ok(results)
    }

    async fn update_payouts(&self, patches: &[PayoutPatch]) -> AppResult<BatchResult<()>> {
        let mut results = Vec::with_capacity(patches.len());
        for patch in patches {
            let mut qb = QueryBuilder::<Postgres>::new("UPDATE payouts SET updated = ");
            qb.push_bind(now_millis());
            if let Some(status) = patch.status {
                qb.push(", status = ").push_bind(status.as_str());
            }
            match (&patch.tx, &patch.tx_hash) {
                (Some(tx), hash) => {
                    let mut tx = tx.clone();
                    if let Some(hash) = hash {
                        tx.hash = Some(hash.clone());
                    }
                    qb.push(", tx = ").push_bind(Json(tx));
                }
                (None, Some(hash)) => {
                    qb.push(", tx = jsonb_set(tx, '{hash}', to_jsonb(")
                        .push_bind(hash.clone())
                        .push("::text))");
                }
                (None, None) => {}
            }
            if let Some(attempts) = patch.attempts {
                qb.push(", attempts = ")
                    .push_bind(i32::try_from(attempts).unwrap_or(i32::MAX));
            }
            if let Some(last_response) = &patch.last_response {
                qb.push(", last_response = ").push_bind(last_response.clone());
            }
            if let Some(block) = &patch.block {
                qb.push(", block_hash = ")
                    .push_bind(block.hash.clone())
                    .push(", block_height = ")
                    .push_bind(to_i64(block.height));
            }
            if let Some(block) = &patch.submit_block {
                qb.push(", submit_block_hash = ")
                    .push_bind(block.hash.clone())
                    .push(", submit_block_height = ")
                    .push_bind(to_i64(block.height));
            }
            qb.push(" WHERE key = ").push_bind(patch.key.clone());

            let result = qb.build().execute(&self.pool).await;
            results.push(match result {
                Ok(r) if r.rows_affected() == 0 => Err(ItemError::not_found(&patch.key)),
                Ok(_) => Ok(()),
                Err(e) => Err(ItemError::backend(&patch.key, e)),
            });
        }
        Ok(results)
    }
}
